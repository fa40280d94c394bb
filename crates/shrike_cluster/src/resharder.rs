//! Reshard orchestration: prepare target shards to receive replication
//! from source shards, install the CDC stream descriptors, start them.
//!
//! The protocol is a linear six-phase state machine; each phase either
//! completes for every shard or aborts the whole operation with the phase
//! name attached to the error:
//!
//! ```text
//! build → validate targets → read ref streams → copy schema
//!       → create streams → start streams
//! ```
//!
//! No rollback is attempted on failure. Partially created streams are left
//! in `Stopped` state and surface on the next attempt through the
//! validate-targets probe, which forces operator cleanup. This is
//! deliberate: CDC catalogs are small and operator-recoverable.
//!
//! A `Resharder` lives for one operation and owns no durable state; all
//! durable state is in the topology store and the per-tablet CDC catalogs.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use shrike_common::error::{ErrorContext, ErrorKind, ShrikeError, ShrikeResult};
use shrike_common::sql::encode_string;
use shrike_vstream::{
    BinlogSource, Filter, InsertGenerator, OnDdlAction, Rule, StreamState, WorkflowSubType,
    WorkflowType, ALLOW_UNSAFE_WRITE_DIRECTIVE, EXCLUDE_FILTER, MATCH_ALL_TABLES,
    VREPLICATION_TABLE,
};

use crate::classifier::{classify, StreamType};
use crate::fanout::{for_all, for_all_collect};
use crate::schema_copy::SchemaCopier;
use crate::tablet::{QueryResult, TabletClient};
use crate::topo::{validate_for_reshard, ShardInfo, TableType, TabletInfo, TopoClient, VSchema};

/// Shared client handles for control-plane operations.
#[derive(Clone)]
pub struct ClusterEnv {
    pub topo: Arc<dyn TopoClient>,
    pub tablets: Arc<dyn TabletClient>,
    pub schema: Arc<dyn SchemaCopier>,
}

/// Scalar knobs of a reshard operation.
#[derive(Debug, Clone)]
pub struct ReshardOptions {
    /// Cell (or comma-separated cells) the new streams replicate from.
    pub cell: String,
    /// Tablet-type preference list for the new streams.
    pub tablet_types: String,
    /// Stop the new streams once the copy phase completes.
    pub stop_after_copy: bool,
    /// DDL handling for the new streams.
    pub on_ddl: OnDdlAction,
    /// Defer secondary-index creation during the copy phase.
    pub defer_secondary_keys: bool,
    /// Wait between consecutive table copies during schema propagation.
    pub copy_pause: Duration,
}

impl Default for ReshardOptions {
    fn default() -> Self {
        Self {
            cell: String::new(),
            tablet_types: String::new(),
            stop_after_copy: false,
            on_ddl: OnDdlAction::Ignore,
            defer_secondary_keys: false,
            copy_pause: Duration::from_secs(1),
        }
    }
}

/// One reshard operation: which keyspace, which shards in and out.
#[derive(Debug, Clone)]
pub struct ReshardRequest {
    pub keyspace: String,
    pub workflow: String,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub options: ReshardOptions,
}

/// The phases of the reshard protocol, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReshardPhase {
    Build,
    ValidateTargets,
    ReadRefStreams,
    CopySchema,
    CreateStreams,
    StartStreams,
}

impl fmt::Display for ReshardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReshardPhase::Build => "build",
            ReshardPhase::ValidateTargets => "validate targets",
            ReshardPhase::ReadRefStreams => "read ref streams",
            ReshardPhase::CopySchema => "copy schema",
            ReshardPhase::CreateStreams => "create streams",
            ReshardPhase::StartStreams => "start streams",
        };
        f.write_str(name)
    }
}

/// A reshard failure: the first phase that failed plus the underlying
/// cause (possibly an aggregate of per-shard errors).
#[derive(Error, Debug)]
#[error("phase {phase}: {source}")]
pub struct ReshardError {
    pub phase: ReshardPhase,
    #[source]
    pub source: ShrikeError,
}

impl ReshardError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// A reference-table stream found on the source side, re-created verbatim
/// on every target. Identified by `(workflow, keyspace, shard)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefStream {
    pub workflow: String,
    pub bls: BinlogSource,
    pub cell: String,
    pub tablet_types: String,
}

impl RefStream {
    fn key(&self) -> String {
        format!("{}:{}:{}", self.workflow, self.bls.keyspace, self.bls.shard)
    }
}

/// Orchestrates one reshard operation; created per command and discarded
/// afterward.
pub struct Resharder {
    env: ClusterEnv,
    keyspace: String,
    workflow: String,
    options: ReshardOptions,
    cancel: CancellationToken,

    source_shards: Vec<ShardInfo>,
    source_primaries: BTreeMap<String, TabletInfo>,
    target_shards: Vec<ShardInfo>,
    target_primaries: BTreeMap<String, TabletInfo>,
    vschema: VSchema,
    ref_streams: BTreeMap<String, RefStream>,
}

impl Resharder {
    /// Run the full reshard protocol. On success, every target carries its
    /// streams in `Running` state and ongoing replication is the tablets'
    /// responsibility.
    pub async fn run(
        env: ClusterEnv,
        request: ReshardRequest,
        cancel: CancellationToken,
    ) -> Result<(), ReshardError> {
        tracing::info!(
            keyspace = %request.keyspace,
            workflow = %request.workflow,
            sources = ?request.sources,
            targets = ?request.targets,
            "starting reshard"
        );

        let mut rs = Self::build(env, request, cancel)
            .await
            .map_err(phase_err(ReshardPhase::Build))?;
        rs.validate_targets()
            .await
            .map_err(phase_err(ReshardPhase::ValidateTargets))?;
        rs.read_ref_streams()
            .await
            .map_err(phase_err(ReshardPhase::ReadRefStreams))?;
        rs.copy_schema()
            .await
            .map_err(phase_err(ReshardPhase::CopySchema))?;
        rs.create_streams()
            .await
            .map_err(phase_err(ReshardPhase::CreateStreams))?;
        rs.start_streams()
            .await
            .map_err(phase_err(ReshardPhase::StartStreams))?;

        tracing::info!(
            keyspace = %rs.keyspace,
            workflow = %rs.workflow,
            "reshard complete, streams running on all targets"
        );
        Ok(())
    }

    /// Phase 1: resolve shards and primaries, enforce serving-state
    /// preconditions, validate the shard partitioning, and cache the
    /// vschema.
    async fn build(
        env: ClusterEnv,
        request: ReshardRequest,
        cancel: CancellationToken,
    ) -> ShrikeResult<Self> {
        let ReshardRequest {
            keyspace,
            workflow,
            sources,
            targets,
            options,
        } = request;

        let mut rs = Self {
            env,
            keyspace,
            workflow,
            options,
            cancel,
            source_shards: Vec::new(),
            source_primaries: BTreeMap::new(),
            target_shards: Vec::new(),
            target_primaries: BTreeMap::new(),
            vschema: VSchema::default(),
            ref_streams: BTreeMap::new(),
        };

        for shard in &sources {
            let si = rs
                .checked(rs.env.topo.get_shard(&rs.keyspace, shard))
                .await
                .ctx_with(|| format!("GetShard({shard}) failed"))?;
            if !si.is_primary_serving {
                return Err(ShrikeError::Precondition(format!(
                    "source shard {shard} is not in serving state"
                )));
            }
            let primary = rs.resolve_primary(&si).await?;
            rs.source_primaries.insert(si.shard_name.clone(), primary);
            rs.source_shards.push(si);
        }

        for shard in &targets {
            let si = rs
                .checked(rs.env.topo.get_shard(&rs.keyspace, shard))
                .await
                .ctx_with(|| format!("GetShard({shard}) failed"))?;
            if si.is_primary_serving {
                return Err(ShrikeError::Precondition(format!(
                    "target shard {shard} is in serving state"
                )));
            }
            let primary = rs.resolve_primary(&si).await?;
            rs.target_primaries.insert(si.shard_name.clone(), primary);
            rs.target_shards.push(si);
        }

        validate_for_reshard(&rs.source_shards, &rs.target_shards)
            .ctx("ValidateForReshard")?;

        rs.vschema = rs
            .checked(rs.env.topo.get_vschema(&rs.keyspace))
            .await
            .ctx("GetVSchema failed")?;

        Ok(rs)
    }

    /// Phase 2: refuse to touch targets that already carry streams. This
    /// probe is the sole protection against double execution.
    async fn validate_targets(&self) -> ShrikeResult<()> {
        for_all(&self.target_shards, |target: ShardInfo| async move {
            let primary = self.target_primary(&target)?;
            let query = format!(
                "select 1 from {} where db_name={}",
                VREPLICATION_TABLE,
                encode_string(&primary.db_name)
            );
            let result = self.exec(primary, &query).await?;
            if result.row_count() != 0 {
                return Err(ShrikeError::Precondition(
                    "some streams already exist in the target shards, please clean them up \
                     and retry the command"
                        .to_string(),
                ));
            }
            Ok(())
        })
        .await
    }

    /// Phase 3: read reference streams from every source in parallel, then
    /// reduce sequentially. The first source defines the expected set;
    /// every other source must match it exactly.
    async fn read_ref_streams(&mut self) -> ShrikeResult<()> {
        let this: &Self = self;
        let snapshots = for_all_collect(&this.source_shards, |source: ShardInfo| async move {
            this.read_source_ref_streams(&source).await
        })
        .await?;

        let mut defining: BTreeMap<String, RefStream> = BTreeMap::new();
        for (i, (source, refs)) in this.source_shards.iter().zip(snapshots).enumerate() {
            if i == 0 {
                for stream in refs {
                    defining.insert(stream.key(), stream);
                }
                continue;
            }
            let mut unseen: std::collections::BTreeSet<String> =
                defining.keys().cloned().collect();
            for stream in refs {
                if !unseen.remove(&stream.key()) {
                    return Err(ShrikeError::Precondition(format!(
                        "streams are mismatched across source shards for workflow: {}",
                        stream.workflow
                    )));
                }
            }
            if !unseen.is_empty() {
                return Err(ShrikeError::Precondition(format!(
                    "streams are mismatched across source shards: {:?} missing on shard {}",
                    unseen, source.shard_name
                )));
            }
        }

        tracing::debug!(
            count = defining.len(),
            "reference streams agreed across sources"
        );
        self.ref_streams = defining;
        Ok(())
    }

    /// Read one source's catalog and keep only its reference streams.
    async fn read_source_ref_streams(&self, source: &ShardInfo) -> ShrikeResult<Vec<RefStream>> {
        let primary = self.source_primary(source)?;
        let query = format!(
            "select workflow, source, cell, tablet_types from {} where db_name={} \
             and message != 'FROZEN'",
            VREPLICATION_TABLE,
            encode_string(&primary.db_name)
        );
        let result = self.exec(primary, &query).await?;

        let mut refs = Vec::new();
        for row in &result.rows {
            if row.len() != 4 {
                return Err(ShrikeError::Internal(format!(
                    "malformed stream row on shard {}: expected 4 columns, got {}",
                    source.shard_name,
                    row.len()
                )));
            }
            let workflow = &row[0];
            if workflow.is_empty() {
                return Err(ShrikeError::Precondition(format!(
                    "streams must have named workflows for migration: shard: {}:{}",
                    source.keyspace, source.shard_name
                )));
            }
            let bls = shrike_vstream::parse_binlog_source(&row[1]).map_err(|e| {
                ShrikeError::Precondition(format!(
                    "invalid stream descriptor on shard {}:{}: {e}",
                    source.keyspace, source.shard_name
                ))
            })?;
            match classify(&bls, &self.vschema)? {
                StreamType::Reference => refs.push(RefStream {
                    workflow: workflow.clone(),
                    bls,
                    cell: row[2].clone(),
                    tablet_types: row[3].clone(),
                }),
                // Sharded streams are regenerated against the new shard
                // set, not carried over.
                _ => continue,
            }
        }
        Ok(refs)
    }

    /// Phase 4: propagate the schema from the first source's primary onto
    /// every target.
    async fn copy_schema(&self) -> ShrikeResult<()> {
        let first = self
            .source_shards
            .first()
            .ok_or_else(|| ShrikeError::Internal("no source shards".to_string()))?;
        let donor = self.source_primary(first)?.alias.clone();
        let tables = vec![MATCH_ALL_TABLES.to_string()];

        for_all(&self.target_shards, |target: ShardInfo| {
            let donor = donor.clone();
            let tables = tables.clone();
            async move {
                self.checked(self.env.schema.copy_schema_shard(
                    &donor,
                    &tables,
                    &[],
                    false,
                    &self.keyspace,
                    &target.shard_name,
                    self.options.copy_pause,
                    // Deferral applies to the streams created below, not
                    // to the schema copy itself.
                    false,
                ))
                .await
                .ctx_with(|| format!("CopySchemaShard({}) failed", target.shard_name))
            }
        })
        .await
    }

    /// Phase 5: install the stream descriptors on every target primary,
    /// one insert statement per target.
    async fn create_streams(&self) -> ShrikeResult<()> {
        let mut exclude_rules: Vec<Rule> = Vec::new();
        for (name, table) in &self.vschema.tables {
            if table.table_type == TableType::Reference {
                exclude_rules.push(Rule::new(name.clone(), EXCLUDE_FILTER));
            }
        }
        let exclude_rules = &exclude_rules;

        for_all(&self.target_shards, |target: ShardInfo| async move {
            let primary = self.target_primary(&target)?;
            let mut generator =
                InsertGenerator::new(StreamState::Stopped, primary.db_name.clone());

            // Each target works on its own copy of the shared template.
            let target_excludes: Vec<Rule> = exclude_rules.clone();
            for source in &self.source_shards {
                if !target.key_range.intersects(&source.key_range) {
                    continue;
                }
                let mut rules = target_excludes.clone();
                rules.push(Rule::new(MATCH_ALL_TABLES, target.key_range.to_string()));
                let bls = BinlogSource {
                    keyspace: self.keyspace.clone(),
                    shard: source.shard_name.clone(),
                    filter: Filter { rules },
                    on_ddl: self.options.on_ddl,
                    stop_after_copy: self.options.stop_after_copy,
                };
                generator.add_row(
                    &self.workflow,
                    &bls,
                    "",
                    &self.options.cell,
                    &self.options.tablet_types,
                    WorkflowType::Reshard,
                    WorkflowSubType::None,
                    self.options.defer_secondary_keys,
                );
            }

            for stream in self.ref_streams.values() {
                // Reference streams keep their original workflow name and
                // descriptor but are re-created under the reshard workflow
                // type even when the originating workflow was of another
                // type; see DESIGN.md.
                generator.add_row(
                    &stream.workflow,
                    &stream.bls,
                    "",
                    &stream.cell,
                    &stream.tablet_types,
                    WorkflowType::Reshard,
                    WorkflowSubType::None,
                    self.options.defer_secondary_keys,
                );
            }

            let query = generator.build()?;
            self.exec(primary, &query).await?;
            tracing::debug!(
                shard = %target.shard_name,
                streams = generator.len(),
                "created streams on target"
            );
            Ok(())
        })
        .await
    }

    /// Phase 6: flip every created stream to `Running`. The bulk update is
    /// safe precisely because phase 2 proved the targets started empty.
    async fn start_streams(&self) -> ShrikeResult<()> {
        for_all(&self.target_shards, |target: ShardInfo| async move {
            let primary = self.target_primary(&target)?;
            let query = format!(
                "update /*vt+ {} */ {} set state='Running' where db_name={}",
                ALLOW_UNSAFE_WRITE_DIRECTIVE,
                VREPLICATION_TABLE,
                encode_string(&primary.db_name)
            );
            self.exec(primary, &query).await?;
            Ok(())
        })
        .await
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn resolve_primary(&self, shard: &ShardInfo) -> ShrikeResult<TabletInfo> {
        let alias = shard.primary_alias.clone().ok_or_else(|| {
            ShrikeError::Precondition(format!(
                "shard {} has no primary tablet",
                shard.shard_name
            ))
        })?;
        self.checked(self.env.topo.get_tablet(&alias))
            .await
            .ctx_with(|| format!("GetTablet({alias}) failed"))
    }

    fn source_primary(&self, shard: &ShardInfo) -> ShrikeResult<&TabletInfo> {
        self.source_primaries.get(&shard.shard_name).ok_or_else(|| {
            ShrikeError::Internal(format!(
                "no primary cached for source shard {}",
                shard.shard_name
            ))
        })
    }

    fn target_primary(&self, shard: &ShardInfo) -> ShrikeResult<&TabletInfo> {
        self.target_primaries.get(&shard.shard_name).ok_or_else(|| {
            ShrikeError::Internal(format!(
                "no primary cached for target shard {}",
                shard.shard_name
            ))
        })
    }

    async fn exec(&self, tablet: &TabletInfo, query: &str) -> ShrikeResult<QueryResult> {
        self.checked(self.env.tablets.vreplication_exec(tablet, query))
            .await
            .ctx_with(|| format!("VReplicationExec({}, {query})", tablet.alias))
    }

    /// Run one RPC under the caller's cancellation token. In-flight calls
    /// abort with `Cancelled`; the token is the only source of timeouts.
    async fn checked<T>(&self, fut: impl Future<Output = ShrikeResult<T>>) -> ShrikeResult<T> {
        match self.cancel.run_until_cancelled(fut).await {
            Some(result) => result,
            None => Err(ShrikeError::Cancelled),
        }
    }
}

fn phase_err(phase: ReshardPhase) -> impl FnOnce(ShrikeError) -> ReshardError {
    move |source| {
        tracing::warn!(%phase, error = %source, "reshard phase failed");
        ReshardError { phase, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        assert_eq!(ReshardPhase::Build.to_string(), "build");
        assert_eq!(ReshardPhase::ValidateTargets.to_string(), "validate targets");
        assert_eq!(ReshardPhase::StartStreams.to_string(), "start streams");
    }

    #[test]
    fn test_reshard_error_carries_phase_and_kind() {
        let err = ReshardError {
            phase: ReshardPhase::ReadRefStreams,
            source: ShrikeError::Precondition("boom".to_string()),
        };
        assert_eq!(err.to_string(), "phase read ref streams: boom");
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn test_ref_stream_key_shape() {
        let stream = RefStream {
            workflow: "country_ref".to_string(),
            bls: BinlogSource {
                keyspace: "ks".to_string(),
                shard: "-".to_string(),
                ..Default::default()
            },
            cell: String::new(),
            tablet_types: String::new(),
        };
        assert_eq!(stream.key(), "country_ref:ks:-");
    }

    #[test]
    fn test_default_options() {
        let options = ReshardOptions::default();
        assert_eq!(options.copy_pause, Duration::from_secs(1));
        assert_eq!(options.on_ddl, OnDdlAction::Ignore);
        assert!(!options.stop_after_copy);
        assert!(!options.defer_secondary_keys);
    }
}
