//! Builder for the multi-row insert that registers streams in the CDC
//! catalog.
//!
//! All rows created by one control-plane operation land on a target in a
//! single statement so the catalog never holds a partial set for that
//! target.

use shrike_common::error::{ShrikeError, ShrikeResult};
use shrike_common::sql::encode_string;

use crate::source::{BinlogSource, StreamState, WorkflowSubType, WorkflowType, VREPLICATION_TABLE};
use crate::textpb::render_binlog_source;

/// Accumulates stream rows destined for one target primary and renders
/// them as a single insert. Every row shares the seeded `state` and
/// `db_name`; `pos` is empty at creation time.
#[derive(Debug)]
pub struct InsertGenerator {
    state: StreamState,
    db_name: String,
    rows: Vec<String>,
}

impl InsertGenerator {
    pub fn new(state: StreamState, db_name: impl Into<String>) -> Self {
        Self {
            state,
            db_name: db_name.into(),
            rows: Vec::new(),
        }
    }

    /// Append one stream row.
    #[allow(clippy::too_many_arguments)]
    pub fn add_row(
        &mut self,
        workflow: &str,
        bls: &BinlogSource,
        pos: &str,
        cell: &str,
        tablet_types: &str,
        workflow_type: WorkflowType,
        workflow_sub_type: WorkflowSubType,
        defer_secondary_keys: bool,
    ) {
        self.rows.push(format!(
            "({}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            encode_string(workflow),
            encode_string(&render_binlog_source(bls)),
            encode_string(pos),
            encode_string(cell),
            encode_string(tablet_types),
            workflow_type.as_i32(),
            workflow_sub_type.as_i32(),
            defer_secondary_keys,
            encode_string(&self.state.to_string()),
            encode_string(&self.db_name),
        ));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render the accumulated insert. An empty generator is a caller bug.
    pub fn build(&self) -> ShrikeResult<String> {
        if self.rows.is_empty() {
            return Err(ShrikeError::Internal(
                "insert generator has no rows".to_string(),
            ));
        }
        Ok(format!(
            "insert into {}(workflow, source, pos, cell, tablet_types, \
             workflow_type, workflow_sub_type, defer_secondary_keys, state, db_name) values {}",
            VREPLICATION_TABLE,
            self.rows.join(", "),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Filter, OnDdlAction, Rule};

    fn sample_bls() -> BinlogSource {
        BinlogSource {
            keyspace: "ks".into(),
            shard: "-".into(),
            filter: Filter {
                rules: vec![Rule::new("/.*", "-80")],
            },
            on_ddl: OnDdlAction::Ignore,
            stop_after_copy: false,
        }
    }

    #[test]
    fn test_single_row_statement() {
        let mut ig = InsertGenerator::new(StreamState::Stopped, "vt_ks");
        ig.add_row(
            "wf",
            &sample_bls(),
            "",
            "zone1",
            "PRIMARY",
            WorkflowType::Reshard,
            WorkflowSubType::None,
            false,
        );
        assert_eq!(
            ig.build().unwrap(),
            "insert into _vt.vreplication(workflow, source, pos, cell, tablet_types, \
             workflow_type, workflow_sub_type, defer_secondary_keys, state, db_name) values \
             ('wf', 'keyspace:\"ks\" shard:\"-\" filter:{rules:{match:\"/.*\" filter:\"-80\"}}', \
             '', 'zone1', 'PRIMARY', 4, 0, false, 'Stopped', 'vt_ks')"
        );
    }

    #[test]
    fn test_multiple_rows_joined() {
        let mut ig = InsertGenerator::new(StreamState::Stopped, "vt_ks");
        for _ in 0..2 {
            ig.add_row(
                "wf",
                &sample_bls(),
                "",
                "",
                "",
                WorkflowType::Reshard,
                WorkflowSubType::None,
                true,
            );
        }
        let sql = ig.build().unwrap();
        assert_eq!(ig.len(), 2);
        assert_eq!(sql.matches("'Stopped'").count(), 2);
        assert!(sql.contains("), ("));
        assert!(sql.contains("true"));
    }

    #[test]
    fn test_empty_generator_is_an_error() {
        let ig = InsertGenerator::new(StreamState::Stopped, "vt_ks");
        assert!(ig.is_empty());
        assert!(ig.build().is_err());
    }

    #[test]
    fn test_descriptor_quotes_survive_sql_encoding() {
        let mut ig = InsertGenerator::new(StreamState::Stopped, "vt_ks");
        ig.add_row(
            "wf",
            &sample_bls(),
            "",
            "",
            "",
            WorkflowType::Reshard,
            WorkflowSubType::None,
            false,
        );
        // The rendered descriptor contains double quotes; they pass through
        // single-quoted SQL encoding untouched.
        assert!(ig.build().unwrap().contains(r#"keyspace:"ks""#));
    }
}
