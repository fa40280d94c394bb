//! Shared foundation for ShrikeDB: identity types, the error taxonomy,
//! key-range math, and SQL literal quoting.
//!
//! Everything in this crate is pure and synchronous; the async control
//! plane lives in `shrike_cluster`.

pub mod error;
pub mod keyrange;
pub mod schema;
pub mod sql;
pub mod types;

pub use error::{ErrorContext, ErrorKind, ShrikeError, ShrikeResult};
pub use keyrange::KeyRange;
pub use types::TabletAlias;
