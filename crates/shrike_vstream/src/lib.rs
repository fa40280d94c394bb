//! CDC stream descriptor model for ShrikeDB.
//!
//! A stream descriptor (`BinlogSource`) tells a tablet which keyspace/shard
//! to tail and which table rows to apply. Descriptors are persisted in the
//! per-tablet CDC catalog (`_vt.vreplication`) with the descriptor itself
//! stored as textual protobuf in the `source` column; that wire format is
//! load-bearing for interop with running clusters and is implemented
//! bit-exactly in [`textpb`].

pub mod insert_generator;
pub mod source;
pub mod textpb;

pub use insert_generator::InsertGenerator;
pub use source::{
    BinlogSource, Filter, OnDdlAction, Rule, StreamState, WorkflowSubType, WorkflowType,
    ALLOW_UNSAFE_WRITE_DIRECTIVE, EXCLUDE_FILTER, FROZEN_MESSAGE, MATCH_ALL_TABLES,
    VREPLICATION_TABLE,
};
pub use textpb::{parse_binlog_source, render_binlog_source, TextPbError};
