//! Schema propagation collaborator.
//!
//! Copying table definitions from a donor tablet to a freshly provisioned
//! shard is a heavyweight operation owned by another subsystem; the
//! control plane drives it through this trait.

use std::time::Duration;

use async_trait::async_trait;

use shrike_common::error::ShrikeResult;
use shrike_common::types::TabletAlias;

/// Copies the schema of a donor tablet onto every tablet of a target
/// shard.
#[async_trait]
pub trait SchemaCopier: Send + Sync {
    /// `tables` and `exclude_tables` are name patterns (`/`-prefixed
    /// entries are regular expressions). `copy_pause` is the wait inserted
    /// between consecutive table copies so that replicas keep up.
    #[allow(clippy::too_many_arguments)]
    async fn copy_schema_shard(
        &self,
        source_primary: &TabletAlias,
        tables: &[String],
        exclude_tables: &[String],
        include_views: bool,
        keyspace: &str,
        target_shard: &str,
        copy_pause: Duration,
        defer_secondary_keys: bool,
    ) -> ShrikeResult<()>;
}
