//! In-memory cluster fixtures for control-plane tests.
//!
//! Assembles a [`MemoryTopo`] and [`MemoryTablet`] into a coherent fake
//! cluster: shards whose names encode their key ranges, one primary tablet
//! per shard, and a recording schema copier. Integration tests drive the
//! real orchestration code against these the same way production drives
//! the real collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use shrike_common::error::{ShrikeError, ShrikeResult};
use shrike_common::keyrange::KeyRange;
use shrike_common::types::TabletAlias;

use crate::resharder::ClusterEnv;
use crate::schema_copy::SchemaCopier;
use crate::tablet::{MemoryTablet, StreamRow};
use crate::topo::{MemoryTopo, ShardInfo, TableType, TabletInfo, VSchema, VSchemaTable};

/// One recorded schema-copy invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaCopyCall {
    pub source_primary: TabletAlias,
    pub tables: Vec<String>,
    pub keyspace: String,
    pub target_shard: String,
    pub copy_pause: Duration,
    pub defer_secondary_keys: bool,
}

/// `SchemaCopier` that records calls instead of copying anything, with
/// optional per-target failure injection.
#[derive(Default)]
pub struct RecordingSchemaCopier {
    calls: Mutex<Vec<SchemaCopyCall>>,
    fail_targets: Mutex<Vec<String>>,
}

impl RecordingSchemaCopier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SchemaCopyCall> {
        self.calls.lock().clone()
    }

    /// Fail any copy onto `target_shard`.
    pub fn fail_for(&self, target_shard: &str) {
        self.fail_targets.lock().push(target_shard.to_string());
    }
}

#[async_trait]
impl SchemaCopier for RecordingSchemaCopier {
    async fn copy_schema_shard(
        &self,
        source_primary: &TabletAlias,
        tables: &[String],
        _exclude_tables: &[String],
        _include_views: bool,
        keyspace: &str,
        target_shard: &str,
        copy_pause: Duration,
        defer_secondary_keys: bool,
    ) -> ShrikeResult<()> {
        if self.fail_targets.lock().iter().any(|t| t == target_shard) {
            return Err(ShrikeError::Internal(format!(
                "schema copy to {target_shard} failed"
            )));
        }
        self.calls.lock().push(SchemaCopyCall {
            source_primary: source_primary.clone(),
            tables: tables.to_vec(),
            keyspace: keyspace.to_string(),
            target_shard: target_shard.to_string(),
            copy_pause,
            defer_secondary_keys,
        });
        Ok(())
    }
}

/// A fake cluster for one keyspace: topology, tablets, and schema copier
/// wired together.
pub struct ClusterFixture {
    pub keyspace: String,
    pub topo: Arc<MemoryTopo>,
    pub tablets: Arc<MemoryTablet>,
    pub schema: Arc<RecordingSchemaCopier>,
    primaries: HashMap<String, TabletInfo>,
    next_uid: u32,
}

impl ClusterFixture {
    pub fn new(keyspace: &str) -> Self {
        let fixture = Self {
            keyspace: keyspace.to_string(),
            topo: Arc::new(MemoryTopo::new()),
            tablets: Arc::new(MemoryTablet::new()),
            schema: Arc::new(RecordingSchemaCopier::new()),
            primaries: HashMap::new(),
            next_uid: 100,
        };
        fixture.topo.set_vschema(keyspace, VSchema::default());
        fixture
    }

    /// Client handles pointing at this fixture.
    pub fn env(&self) -> ClusterEnv {
        ClusterEnv {
            topo: self.topo.clone(),
            tablets: self.tablets.clone(),
            schema: self.schema.clone(),
        }
    }

    /// Add a shard whose name encodes its key range, plus its primary
    /// tablet. Panics on malformed names; fixtures are test code.
    pub fn add_shard(&mut self, shard_name: &str, serving: bool) -> TabletInfo {
        let alias = TabletAlias::new("zone1", self.next_uid);
        self.next_uid += 1;

        let key_range = KeyRange::parse(shard_name).expect("fixture shard name");
        self.topo.add_shard(ShardInfo {
            keyspace: self.keyspace.clone(),
            shard_name: shard_name.to_string(),
            key_range,
            is_primary_serving: serving,
            primary_alias: Some(alias.clone()),
        });

        let tablet = TabletInfo {
            alias,
            keyspace: self.keyspace.clone(),
            shard: shard_name.to_string(),
            db_name: format!("vt_{}", self.keyspace),
        };
        self.topo.add_tablet(tablet.clone());
        self.primaries.insert(shard_name.to_string(), tablet.clone());
        tablet
    }

    pub fn add_source_shard(&mut self, shard_name: &str) -> TabletInfo {
        self.add_shard(shard_name, true)
    }

    pub fn add_target_shard(&mut self, shard_name: &str) -> TabletInfo {
        self.add_shard(shard_name, false)
    }

    /// The primary tablet of a previously added shard.
    pub fn primary(&self, shard_name: &str) -> &TabletInfo {
        &self.primaries[shard_name]
    }

    /// Declare vschema tables; every listed reference table gets
    /// `TableType::Reference`, the rest default to sharded.
    pub fn set_tables(&self, sharded: &[&str], reference: &[&str]) {
        let mut vschema = VSchema {
            sharded: true,
            ..Default::default()
        };
        for name in sharded {
            vschema.tables.insert(
                name.to_string(),
                VSchemaTable {
                    table_type: TableType::Sharded,
                },
            );
        }
        for name in reference {
            vschema.tables.insert(
                name.to_string(),
                VSchemaTable {
                    table_type: TableType::Reference,
                },
            );
        }
        self.topo.set_vschema(&self.keyspace, vschema);
    }

    /// Seed a stream row into a shard primary's CDC catalog.
    pub fn seed_stream(&self, shard_name: &str, row: StreamRow) {
        let alias = &self.primaries[shard_name].alias;
        self.tablets.seed_stream(alias, row);
    }

    /// Snapshot of a shard primary's CDC catalog.
    pub fn streams(&self, shard_name: &str) -> Vec<StreamRow> {
        let alias = &self.primaries[shard_name].alias;
        self.tablets.streams(alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_wires_topology_and_tablets() {
        let mut fixture = ClusterFixture::new("ks");
        let tablet = fixture.add_source_shard("-80");
        fixture.add_target_shard("80-");

        let env = fixture.env();
        let si = env.topo.get_shard("ks", "-80").await.unwrap();
        assert!(si.is_primary_serving);
        assert_eq!(si.primary_alias.as_ref(), Some(&tablet.alias));
        assert_eq!(
            env.topo.get_tablet(&tablet.alias).await.unwrap().db_name,
            "vt_ks"
        );
        assert!(!env
            .topo
            .get_shard("ks", "80-")
            .await
            .unwrap()
            .is_primary_serving);
    }

    #[tokio::test]
    async fn test_set_tables_marks_reference_types() {
        let fixture = ClusterFixture::new("ks");
        fixture.set_tables(&["customer"], &["country"]);
        let vschema = fixture.env().topo.get_vschema("ks").await.unwrap();
        assert_eq!(
            vschema.tables["country"].table_type,
            TableType::Reference
        );
        assert_eq!(vschema.tables["customer"].table_type, TableType::Sharded);
    }
}
