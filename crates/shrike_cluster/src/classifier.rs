//! Classification of stream descriptors as sharded or reference.
//!
//! Reference tables are small, fully replicated tables with their own
//! dedicated streams; sharded tables flow through key-range-filtered
//! streams. A single stream must be homogeneous — a filter that mixes the
//! two kinds cannot be resharded and is rejected outright.

use shrike_common::error::ShrikeResult;
use shrike_common::schema::is_internal_operation_table_name;
use shrike_common::ShrikeError;
use shrike_vstream::{render_binlog_source, BinlogSource, Rule};

use crate::topo::{TableType, VSchema};

/// Kind of tables a stream addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Unknown,
    Sharded,
    Reference,
}

/// Classify a stream by its filter rules. A stream with no rules at all
/// classifies as sharded.
pub fn classify(bls: &BinlogSource, vschema: &VSchema) -> ShrikeResult<StreamType> {
    let mut stream_type = StreamType::Unknown;
    for rule in &bls.filter.rules {
        match rule_type(rule, vschema)? {
            StreamType::Sharded => {
                if stream_type == StreamType::Reference {
                    return Err(mix_error(bls));
                }
                stream_type = StreamType::Sharded;
            }
            StreamType::Reference => {
                if stream_type == StreamType::Sharded {
                    return Err(mix_error(bls));
                }
                stream_type = StreamType::Reference;
            }
            StreamType::Unknown => {}
        }
    }
    if stream_type == StreamType::Reference {
        Ok(StreamType::Reference)
    } else {
        Ok(StreamType::Sharded)
    }
}

fn rule_type(rule: &Rule, vschema: &VSchema) -> ShrikeResult<StreamType> {
    match vschema.tables.get(&rule.match_) {
        Some(table) if table.table_type == TableType::Reference => Ok(StreamType::Reference),
        // Any other vschema table counts as sharded here; further
        // subtleties don't matter for stream routing.
        Some(_) => Ok(StreamType::Sharded),
        None if is_internal_operation_table_name(&rule.match_) => Ok(StreamType::Sharded),
        None => Err(ShrikeError::Precondition(format!(
            "table {} not found in vschema",
            rule.match_
        ))),
    }
}

fn mix_error(bls: &BinlogSource) -> ShrikeError {
    ShrikeError::Precondition(format!(
        "cannot reshard streams with a mix of reference and sharded tables: {}",
        render_binlog_source(bls)
    ))
}
