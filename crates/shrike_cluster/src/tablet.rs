//! Remote command channel to tablets.
//!
//! The control plane talks to a shard's primary through a single entry
//! point, `vreplication_exec`, which runs a statement against the tablet's
//! CDC catalog. The RPC layer is at-least-once; callers are responsible
//! for never issuing the same side-effecting statement twice against a
//! target within one operation.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use shrike_common::error::{RpcError, ShrikeResult};
use shrike_common::types::TabletAlias;
use shrike_vstream::{ALLOW_UNSAFE_WRITE_DIRECTIVE, FROZEN_MESSAGE, VREPLICATION_TABLE};

use crate::topo::TabletInfo;

/// Rows returned by a CDC catalog query. Values arrive as text, matching
/// the wire representation of the underlying result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// RPC client for tablet CDC catalog operations.
#[async_trait]
pub trait TabletClient: Send + Sync {
    async fn vreplication_exec(
        &self,
        tablet: &TabletInfo,
        query: &str,
    ) -> ShrikeResult<QueryResult>;
}

// ── In-memory tablet fleet ───────────────────────────────────────────

/// One row of a tablet's CDC catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRow {
    pub id: u64,
    pub workflow: String,
    /// Textual-protobuf stream descriptor.
    pub source: String,
    pub pos: String,
    pub cell: String,
    pub tablet_types: String,
    pub workflow_type: i32,
    pub workflow_sub_type: i32,
    pub defer_secondary_keys: bool,
    pub state: String,
    pub message: String,
}

impl StreamRow {
    /// A running stream with the given workflow and descriptor text;
    /// remaining columns empty.
    pub fn running(workflow: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: 0,
            workflow: workflow.into(),
            source: source.into(),
            pos: String::new(),
            cell: String::new(),
            tablet_types: String::new(),
            workflow_type: 0,
            workflow_sub_type: 0,
            defer_secondary_keys: false,
            state: "Running".to_string(),
            message: String::new(),
        }
    }
}

/// In-process `TabletClient` holding one CDC catalog per tablet.
///
/// Understands exactly the statement shapes the control plane emits:
/// existence probe, stream enumeration, generated inserts, and the
/// directive-guarded bulk state update. Anything else is rejected the way
/// a real tablet would reject it.
#[derive(Default)]
pub struct MemoryTablet {
    inner: Mutex<MemoryTabletInner>,
}

#[derive(Default)]
struct MemoryTabletInner {
    /// Catalog rows keyed by tablet alias.
    catalogs: HashMap<String, Vec<StreamRow>>,
    next_id: u64,
    /// Injected faults: `(alias, query substring)` pairs that fail the call.
    faults: Vec<(String, String)>,
}

impl MemoryTablet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing stream into a tablet's catalog.
    pub fn seed_stream(&self, alias: &TabletAlias, mut row: StreamRow) {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        row.id = inner.next_id;
        inner.catalogs.entry(alias.to_string()).or_default().push(row);
    }

    /// Snapshot of a tablet's catalog.
    pub fn streams(&self, alias: &TabletAlias) -> Vec<StreamRow> {
        self.inner
            .lock()
            .catalogs
            .get(&alias.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Fail any call on `alias` whose query contains `query_substring`.
    pub fn inject_fault(&self, alias: &TabletAlias, query_substring: &str) {
        self.inner
            .lock()
            .faults
            .push((alias.to_string(), query_substring.to_string()));
    }
}

#[async_trait]
impl TabletClient for MemoryTablet {
    async fn vreplication_exec(
        &self,
        tablet: &TabletInfo,
        query: &str,
    ) -> ShrikeResult<QueryResult> {
        let key = tablet.alias.to_string();
        let mut inner = self.inner.lock();

        if inner
            .faults
            .iter()
            .any(|(alias, needle)| *alias == key && query.contains(needle.as_str()))
        {
            return Err(RpcError::QueryFailed {
                tablet: key,
                reason: "injected fault".to_string(),
            }
            .into());
        }

        let probe_prefix = format!("select 1 from {VREPLICATION_TABLE}");
        let enumerate_prefix =
            format!("select workflow, source, cell, tablet_types from {VREPLICATION_TABLE}");
        let insert_prefix = format!("insert into {VREPLICATION_TABLE}");

        if query.starts_with(&probe_prefix) {
            let rows = inner
                .catalogs
                .get(&key)
                .map(|streams| streams.iter().map(|_| vec!["1".to_string()]).collect())
                .unwrap_or_default();
            return Ok(QueryResult { rows });
        }

        if query.starts_with(&enumerate_prefix) {
            let rows = inner
                .catalogs
                .get(&key)
                .map(|streams| {
                    streams
                        .iter()
                        .filter(|s| s.message != FROZEN_MESSAGE)
                        .map(|s| {
                            vec![
                                s.workflow.clone(),
                                s.source.clone(),
                                s.cell.clone(),
                                s.tablet_types.clone(),
                            ]
                        })
                        .collect()
                })
                .unwrap_or_default();
            return Ok(QueryResult { rows });
        }

        if query.starts_with(&insert_prefix) {
            let rows = parse_insert_rows(query, &tablet.db_name).map_err(|reason| {
                RpcError::QueryFailed {
                    tablet: key.clone(),
                    reason,
                }
            })?;
            for mut row in rows {
                inner.next_id += 1;
                row.id = inner.next_id;
                inner.catalogs.entry(key.clone()).or_default().push(row);
            }
            return Ok(QueryResult::empty());
        }

        if query.starts_with("update ") && query.contains("set state='Running'") {
            if !query.contains(ALLOW_UNSAFE_WRITE_DIRECTIVE) {
                return Err(RpcError::QueryFailed {
                    tablet: key,
                    reason: "unsafe vreplication update without directive".to_string(),
                }
                .into());
            }
            if let Some(streams) = inner.catalogs.get_mut(&key) {
                for s in streams.iter_mut() {
                    s.state = "Running".to_string();
                }
            }
            return Ok(QueryResult::empty());
        }

        Err(RpcError::QueryFailed {
            tablet: key,
            reason: format!("unsupported statement: {query}"),
        }
        .into())
    }
}

// ── Insert statement parsing ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum SqlValue {
    Str(String),
    Num(i64),
    Bool(bool),
}

/// Parse the value tuples of a generated catalog insert into rows,
/// verifying the db_name column.
fn parse_insert_rows(sql: &str, db_name: &str) -> Result<Vec<StreamRow>, String> {
    let tuples = parse_value_tuples(sql)?;
    let mut rows = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        if tuple.len() != 10 {
            return Err(format!("expected 10 columns, got {}", tuple.len()));
        }
        let row_db = as_str(&tuple[9])?;
        if row_db != db_name {
            return Err(format!("db_name mismatch: {row_db} vs {db_name}"));
        }
        rows.push(StreamRow {
            id: 0,
            workflow: as_str(&tuple[0])?,
            source: as_str(&tuple[1])?,
            pos: as_str(&tuple[2])?,
            cell: as_str(&tuple[3])?,
            tablet_types: as_str(&tuple[4])?,
            workflow_type: as_num(&tuple[5])? as i32,
            workflow_sub_type: as_num(&tuple[6])? as i32,
            defer_secondary_keys: as_bool(&tuple[7])?,
            state: as_str(&tuple[8])?,
            message: String::new(),
        });
    }
    Ok(rows)
}

fn as_str(v: &SqlValue) -> Result<String, String> {
    match v {
        SqlValue::Str(s) => Ok(s.clone()),
        other => Err(format!("expected string, got {other:?}")),
    }
}

fn as_num(v: &SqlValue) -> Result<i64, String> {
    match v {
        SqlValue::Num(n) => Ok(*n),
        other => Err(format!("expected number, got {other:?}")),
    }
}

fn as_bool(v: &SqlValue) -> Result<bool, String> {
    match v {
        SqlValue::Bool(b) => Ok(*b),
        other => Err(format!("expected bool, got {other:?}")),
    }
}

/// Split `… values (…), (…)` into tuples of literals, honouring quoting
/// and backslash escapes.
fn parse_value_tuples(sql: &str) -> Result<Vec<Vec<SqlValue>>, String> {
    let idx = sql
        .find(" values ")
        .ok_or_else(|| "missing values clause".to_string())?;
    let mut cur = Cursor {
        s: &sql[idx + " values ".len()..],
        pos: 0,
    };
    let mut tuples = Vec::new();
    loop {
        cur.skip_ws();
        cur.expect('(')?;
        let mut tuple = Vec::new();
        loop {
            tuple.push(cur.parse_value()?);
            cur.skip_ws();
            match cur.bump()? {
                ',' => continue,
                ')' => break,
                c => return Err(format!("unexpected character {c:?} in tuple")),
            }
        }
        tuples.push(tuple);
        cur.skip_ws();
        if cur.at_eof() {
            return Ok(tuples);
        }
        cur.expect(',')?;
    }
}

struct Cursor<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at_eof(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn peek(&self) -> Option<char> {
        self.s[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Result<char, String> {
        let c = self.peek().ok_or_else(|| "unexpected end of statement".to_string())?;
        self.pos += c.len_utf8();
        Ok(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, want: char) -> Result<(), String> {
        self.skip_ws();
        let got = self.bump()?;
        if got == want {
            Ok(())
        } else {
            Err(format!("expected {want:?}, got {got:?}"))
        }
    }

    fn parse_value(&mut self) -> Result<SqlValue, String> {
        self.skip_ws();
        if self.peek() == Some('\'') {
            return self.parse_quoted().map(SqlValue::Str);
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ',' || c == ')' {
                break;
            }
            self.pos += c.len_utf8();
        }
        let token = self.s[start..self.pos].trim();
        match token {
            "true" => Ok(SqlValue::Bool(true)),
            "false" => Ok(SqlValue::Bool(false)),
            _ => token
                .parse::<i64>()
                .map(SqlValue::Num)
                .map_err(|_| format!("unparseable literal {token:?}")),
        }
    }

    fn parse_quoted(&mut self) -> Result<String, String> {
        self.expect('\'')?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                '\'' => return Ok(out),
                '\\' => match self.bump()? {
                    '\'' => out.push('\''),
                    '\\' => out.push('\\'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    c => return Err(format!("bad escape {c:?} in string literal")),
                },
                c => out.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shrike_common::sql::encode_string;
    use shrike_vstream::{
        BinlogSource, Filter, InsertGenerator, Rule, StreamState, WorkflowSubType, WorkflowType,
    };

    fn tablet() -> TabletInfo {
        TabletInfo {
            alias: TabletAlias::new("zone1", 100),
            keyspace: "ks".to_string(),
            shard: "-80".to_string(),
            db_name: "vt_ks".to_string(),
        }
    }

    fn probe(db_name: &str) -> String {
        format!(
            "select 1 from {} where db_name={}",
            VREPLICATION_TABLE,
            encode_string(db_name)
        )
    }

    #[tokio::test]
    async fn test_probe_reflects_catalog_rows() {
        let client = MemoryTablet::new();
        let t = tablet();
        let qr = client.vreplication_exec(&t, &probe("vt_ks")).await.unwrap();
        assert_eq!(qr.row_count(), 0);

        client.seed_stream(&t.alias, StreamRow::running("wf", "keyspace:\"ks\""));
        let qr = client.vreplication_exec(&t, &probe("vt_ks")).await.unwrap();
        assert_eq!(qr.rows, vec![vec!["1".to_string()]]);
    }

    #[tokio::test]
    async fn test_enumerate_skips_frozen_streams() {
        let client = MemoryTablet::new();
        let t = tablet();
        client.seed_stream(&t.alias, StreamRow::running("live", "a"));
        let mut frozen = StreamRow::running("dead", "b");
        frozen.message = FROZEN_MESSAGE.to_string();
        client.seed_stream(&t.alias, frozen);

        let query = format!(
            "select workflow, source, cell, tablet_types from {} where db_name={} and message != 'FROZEN'",
            VREPLICATION_TABLE,
            encode_string("vt_ks")
        );
        let qr = client.vreplication_exec(&t, &query).await.unwrap();
        assert_eq!(qr.row_count(), 1);
        assert_eq!(qr.rows[0][0], "live");
    }

    #[tokio::test]
    async fn test_generated_insert_round_trips() {
        let client = MemoryTablet::new();
        let t = tablet();

        let bls = BinlogSource {
            keyspace: "ks".to_string(),
            shard: "-".to_string(),
            filter: Filter {
                rules: vec![Rule::new("/.*", "-80")],
            },
            ..Default::default()
        };
        let mut ig = InsertGenerator::new(StreamState::Stopped, "vt_ks");
        ig.add_row(
            "wf",
            &bls,
            "",
            "zone1",
            "PRIMARY",
            WorkflowType::Reshard,
            WorkflowSubType::None,
            true,
        );
        client
            .vreplication_exec(&t, &ig.build().unwrap())
            .await
            .unwrap();

        let rows = client.streams(&t.alias);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.workflow, "wf");
        assert_eq!(row.state, "Stopped");
        assert_eq!(row.workflow_type, 4);
        assert_eq!(row.workflow_sub_type, 0);
        assert!(row.defer_secondary_keys);
        assert!(row.source.contains("filter:\"-80\""));
        assert!(row.pos.is_empty());
    }

    #[tokio::test]
    async fn test_insert_rejects_db_name_mismatch() {
        let client = MemoryTablet::new();
        let t = tablet();
        let mut ig = InsertGenerator::new(StreamState::Stopped, "vt_other");
        ig.add_row(
            "wf",
            &BinlogSource::default(),
            "",
            "",
            "",
            WorkflowType::Reshard,
            WorkflowSubType::None,
            false,
        );
        let err = client
            .vreplication_exec(&t, &ig.build().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("db_name mismatch"));
    }

    #[tokio::test]
    async fn test_update_requires_directive() {
        let client = MemoryTablet::new();
        let t = tablet();
        client.seed_stream(&t.alias, {
            let mut r = StreamRow::running("wf", "a");
            r.state = "Stopped".to_string();
            r
        });

        let bare = format!(
            "update {} set state='Running' where db_name={}",
            VREPLICATION_TABLE,
            encode_string("vt_ks")
        );
        assert!(client.vreplication_exec(&t, &bare).await.is_err());
        assert_eq!(client.streams(&t.alias)[0].state, "Stopped");

        let guarded = format!(
            "update /*vt+ {} */ {} set state='Running' where db_name={}",
            ALLOW_UNSAFE_WRITE_DIRECTIVE,
            VREPLICATION_TABLE,
            encode_string("vt_ks")
        );
        client.vreplication_exec(&t, &guarded).await.unwrap();
        assert_eq!(client.streams(&t.alias)[0].state, "Running");
    }

    #[tokio::test]
    async fn test_injected_fault_fails_matching_query() {
        let client = MemoryTablet::new();
        let t = tablet();
        client.inject_fault(&t.alias, "select 1");
        let err = client.vreplication_exec(&t, &probe("vt_ks")).await.unwrap_err();
        assert!(err.to_string().contains("injected fault"));
        // Other statement shapes still work.
        let query = format!(
            "select workflow, source, cell, tablet_types from {} where db_name={} and message != 'FROZEN'",
            VREPLICATION_TABLE,
            encode_string("vt_ks")
        );
        assert!(client.vreplication_exec(&t, &query).await.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_statement_rejected() {
        let client = MemoryTablet::new();
        let t = tablet();
        let err = client
            .vreplication_exec(&t, "delete from _vt.vreplication")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported statement"));
    }

    #[test]
    fn test_tuple_parser_handles_escaped_quotes() {
        let sql = format!(
            "insert into t(a, b) values ({}, 42), ('plain', -1)",
            encode_string("it's a \\ test")
        );
        let tuples = parse_value_tuples(&sql).unwrap();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0][0], SqlValue::Str("it's a \\ test".to_string()));
        assert_eq!(tuples[0][1], SqlValue::Num(42));
        assert_eq!(tuples[1][1], SqlValue::Num(-1));
    }
}
