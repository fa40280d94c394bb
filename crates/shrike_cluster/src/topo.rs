//! Read-only facade over the cluster topology directory.
//!
//! The topology store is an external service; this module defines the data
//! it serves (`ShardInfo`, `TabletInfo`, `VSchema`), the client trait the
//! control plane consumes, and shard-set validation for reshard
//! operations. Lookups are idempotent and safely cacheable per operation;
//! a transient failure fails the operation — retry policy belongs to the
//! surrounding orchestrator, not here.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use shrike_common::error::{ShrikeResult, TopoError};
use shrike_common::keyrange::{combine_contiguous, KeyRange};
use shrike_common::types::TabletAlias;
use shrike_common::ShrikeError;

/// One shard of a keyspace as recorded in the topology store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub keyspace: String,
    pub shard_name: String,
    pub key_range: KeyRange,
    /// Whether the primary of this shard currently serves traffic. At any
    /// moment, at most one serving shard covers any given key.
    pub is_primary_serving: bool,
    pub primary_alias: Option<TabletAlias>,
}

/// A running tablet as recorded in the topology store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabletInfo {
    pub alias: TabletAlias,
    pub keyspace: String,
    pub shard: String,
    /// MySQL database name backing this tablet.
    pub db_name: String,
}

/// Table category in the vschema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    Sharded,
    Reference,
    #[default]
    Unspecified,
}

/// Per-table vschema descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VSchemaTable {
    pub table_type: TableType,
}

/// The vschema of a keyspace: table name to descriptor. A `BTreeMap` keeps
/// iteration deterministic, which downstream rule generation relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VSchema {
    pub sharded: bool,
    pub tables: std::collections::BTreeMap<String, VSchemaTable>,
}

/// Read-only client for the topology store.
#[async_trait]
pub trait TopoClient: Send + Sync {
    async fn get_shard(&self, keyspace: &str, shard: &str) -> ShrikeResult<ShardInfo>;
    async fn get_tablet(&self, alias: &TabletAlias) -> ShrikeResult<TabletInfo>;
    async fn get_vschema(&self, keyspace: &str) -> ShrikeResult<VSchema>;
}

/// Check that `targets` can replace `sources`: no range may appear on both
/// sides, each side must tile a contiguous span, and the two spans must be
/// equal.
pub fn validate_for_reshard(sources: &[ShardInfo], targets: &[ShardInfo]) -> ShrikeResult<()> {
    for source in sources {
        for target in targets {
            if source.key_range == target.key_range {
                return Err(ShrikeError::Validation(format!(
                    "same keyrange is present in source and target: {}",
                    source.key_range,
                )));
            }
        }
    }
    let source_span = combine_contiguous(sources.iter().map(|s| s.key_range.clone()).collect())
        .map_err(|e| ShrikeError::Validation(format!("source shards: {e}")))?;
    let target_span = combine_contiguous(targets.iter().map(|s| s.key_range.clone()).collect())
        .map_err(|e| ShrikeError::Validation(format!("target shards: {e}")))?;
    if source_span != target_span {
        return Err(ShrikeError::Validation(format!(
            "source and target keyranges are not equal: {source_span} vs {target_span}",
        )));
    }
    Ok(())
}

// ── In-memory topology store ─────────────────────────────────────────

/// In-process `TopoClient` backed by plain maps. Serves unit and
/// integration tests the same way the real store serves production.
#[derive(Default)]
pub struct MemoryTopo {
    inner: Mutex<MemoryTopoInner>,
}

#[derive(Default)]
struct MemoryTopoInner {
    shards: HashMap<(String, String), ShardInfo>,
    tablets: HashMap<TabletAlias, TabletInfo>,
    vschemas: HashMap<String, VSchema>,
}

impl MemoryTopo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shard(&self, shard: ShardInfo) {
        let mut inner = self.inner.lock();
        inner
            .shards
            .insert((shard.keyspace.clone(), shard.shard_name.clone()), shard);
    }

    pub fn add_tablet(&self, tablet: TabletInfo) {
        self.inner.lock().tablets.insert(tablet.alias.clone(), tablet);
    }

    pub fn set_vschema(&self, keyspace: &str, vschema: VSchema) {
        self.inner.lock().vschemas.insert(keyspace.to_string(), vschema);
    }
}

#[async_trait]
impl TopoClient for MemoryTopo {
    async fn get_shard(&self, keyspace: &str, shard: &str) -> ShrikeResult<ShardInfo> {
        self.inner
            .lock()
            .shards
            .get(&(keyspace.to_string(), shard.to_string()))
            .cloned()
            .ok_or_else(|| {
                TopoError::ShardNotFound {
                    keyspace: keyspace.to_string(),
                    shard: shard.to_string(),
                }
                .into()
            })
    }

    async fn get_tablet(&self, alias: &TabletAlias) -> ShrikeResult<TabletInfo> {
        self.inner
            .lock()
            .tablets
            .get(alias)
            .cloned()
            .ok_or_else(|| TopoError::TabletNotFound(alias.to_string()).into())
    }

    async fn get_vschema(&self, keyspace: &str) -> ShrikeResult<VSchema> {
        self.inner
            .lock()
            .vschemas
            .get(keyspace)
            .cloned()
            .ok_or_else(|| TopoError::VSchemaNotFound(keyspace.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shrike_common::error::ErrorKind;

    fn shard(name: &str, serving: bool) -> ShardInfo {
        ShardInfo {
            keyspace: "ks".to_string(),
            shard_name: name.to_string(),
            key_range: KeyRange::parse(name).unwrap(),
            is_primary_serving: serving,
            primary_alias: Some(TabletAlias::new("zone1", 100)),
        }
    }

    #[test]
    fn test_validate_split_is_ok() {
        let sources = [shard("-", true)];
        let targets = [shard("-80", false), shard("80-", false)];
        validate_for_reshard(&sources, &targets).unwrap();
    }

    #[test]
    fn test_validate_merge_is_ok() {
        let sources = [shard("-40", true), shard("40-", true)];
        let targets = [shard("-", false)];
        validate_for_reshard(&sources, &targets).unwrap();
    }

    #[test]
    fn test_validate_rejects_shared_range() {
        let sources = [shard("-80", true), shard("80-", true)];
        let targets = [shard("-40", false), shard("40-80", false), shard("80-", false)];
        let err = validate_for_reshard(&sources, &targets).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err
            .to_string()
            .contains("same keyrange is present in source and target: 80-"));
    }

    #[test]
    fn test_validate_rejects_target_hole() {
        let sources = [shard("-", true)];
        let targets = [shard("-40", false), shard("80-", false)];
        let err = validate_for_reshard(&sources, &targets).unwrap_err();
        assert!(err.to_string().contains("target shards"));
    }

    #[test]
    fn test_validate_rejects_unequal_spans() {
        let sources = [shard("-80", true)];
        let targets = [shard("-40", false), shard("40-c0", false)];
        let err = validate_for_reshard(&sources, &targets).unwrap_err();
        assert!(err
            .to_string()
            .contains("source and target keyranges are not equal"));
    }

    #[tokio::test]
    async fn test_memory_topo_lookups() {
        let topo = MemoryTopo::new();
        topo.add_shard(shard("-80", true));
        let tablet = TabletInfo {
            alias: TabletAlias::new("zone1", 100),
            keyspace: "ks".to_string(),
            shard: "-80".to_string(),
            db_name: "vt_ks".to_string(),
        };
        topo.add_tablet(tablet.clone());
        topo.set_vschema("ks", VSchema::default());

        assert_eq!(topo.get_shard("ks", "-80").await.unwrap().shard_name, "-80");
        assert_eq!(
            topo.get_tablet(&TabletAlias::new("zone1", 100)).await.unwrap(),
            tablet
        );
        assert!(topo.get_vschema("ks").await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_topo_not_found() {
        let topo = MemoryTopo::new();
        let err = topo.get_shard("ks", "-80").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Topology);
        let err = topo.get_tablet(&TabletAlias::new("zone1", 1)).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(topo.get_vschema("nope").await.is_err());
    }
}
