//! Cluster control plane for ShrikeDB.
//!
//! The centerpiece is the [`resharder`]: the orchestration that prepares a
//! set of non-serving target shards to receive replication streams from a
//! set of serving source shards, installs CDC stream descriptors on each
//! target primary, and starts them. Data movement and cutover are separate
//! stages that run after this one succeeds.
//!
//! Collaborators are behind traits — the topology store ([`topo`]), the
//! tablet RPC channel ([`tablet`]), and schema propagation
//! ([`schema_copy`]) — with in-process implementations used by the test
//! suite.

pub mod classifier;
pub mod fanout;
pub mod resharder;
pub mod schema_copy;
pub mod tablet;
pub mod testkit;
pub mod topo;

pub use classifier::{classify, StreamType};
pub use fanout::{for_all, for_all_collect};
pub use resharder::{
    ClusterEnv, RefStream, ReshardError, ReshardOptions, ReshardPhase, ReshardRequest, Resharder,
};
pub use schema_copy::SchemaCopier;
pub use tablet::{MemoryTablet, QueryResult, StreamRow, TabletClient};
pub use topo::{
    validate_for_reshard, MemoryTopo, ShardInfo, TableType, TabletInfo, TopoClient, VSchema,
    VSchemaTable,
};
