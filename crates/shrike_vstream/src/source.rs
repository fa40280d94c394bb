//! Stream descriptor types and CDC catalog constants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The per-tablet CDC catalog table.
pub const VREPLICATION_TABLE: &str = "_vt.vreplication";

/// Catalog `message` value marking a stream as end-of-life. Frozen streams
/// are invisible to control-plane reads.
pub const FROZEN_MESSAGE: &str = "FROZEN";

/// Comment directive authorising bulk writes against the CDC catalog
/// (writes that deliberately touch every stream of a db).
pub const ALLOW_UNSAFE_WRITE_DIRECTIVE: &str = "ALLOW_UNSAFE_VREPLICATION_WRITE";

/// Rule filter literal that suppresses a table on a stream.
pub const EXCLUDE_FILTER: &str = "exclude";

/// Rule match glob covering every table.
pub const MATCH_ALL_TABLES: &str = "/.*";

/// One table-matching rule of a stream filter. `match_` is a table name or
/// a `/`-prefixed regular expression; `filter` is `"exclude"`, a key-range
/// literal, or empty (replicate as-is).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "match")]
    pub match_: String,
    pub filter: String,
}

impl Rule {
    pub fn new(match_: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            match_: match_.into(),
            filter: filter.into(),
        }
    }
}

/// Ordered list of rules; first match wins on the applying tablet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub rules: Vec<Rule>,
}

/// What the applying tablet does when it encounters DDL in the source
/// binlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDdlAction {
    #[default]
    Ignore,
    Stop,
    Exec,
    ExecIgnore,
}

impl fmt::Display for OnDdlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OnDdlAction::Ignore => "IGNORE",
            OnDdlAction::Stop => "STOP",
            OnDdlAction::Exec => "EXEC",
            OnDdlAction::ExecIgnore => "EXEC_IGNORE",
        };
        f.write_str(name)
    }
}

/// Error for unrecognised enum names in config or wire text.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown enum value {0:?}")]
pub struct UnknownEnumValue(pub String);

impl FromStr for OnDdlAction {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IGNORE" => Ok(OnDdlAction::Ignore),
            "STOP" => Ok(OnDdlAction::Stop),
            "EXEC" => Ok(OnDdlAction::Exec),
            "EXEC_IGNORE" => Ok(OnDdlAction::ExecIgnore),
            other => Err(UnknownEnumValue(other.to_string())),
        }
    }
}

/// The workflow kind a stream belongs to, stored numerically in the
/// catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum WorkflowType {
    Materialize = 0,
    MoveTables = 1,
    CreateLookupVindex = 2,
    Migrate = 3,
    Reshard = 4,
    OnlineDdl = 5,
}

impl WorkflowType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Workflow sub-type, stored numerically in the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum WorkflowSubType {
    #[default]
    None = 0,
    Partial = 1,
}

impl WorkflowSubType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Lifecycle state of a stream in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Stopped,
    Running,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Stopped => f.write_str("Stopped"),
            StreamState::Running => f.write_str("Running"),
        }
    }
}

/// Descriptor of a single CDC stream's origin and filter: which shard to
/// tail, which rows to apply, and DDL/copy behavior. Field order mirrors
/// the wire message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogSource {
    pub keyspace: String,
    pub shard: String,
    pub filter: Filter,
    pub on_ddl: OnDdlAction,
    pub stop_after_copy: bool,
}
