//! Recognition of internal-operation table names.
//!
//! Online schema change and table lifecycle tooling create scratch tables
//! on shards (shadow copies being backfilled, ghost changelogs, tables
//! parked for garbage collection). These never appear in the vschema, so
//! consumers that look tables up there need a way to tell "scratch table"
//! apart from "typo".

/// Prefix of tables owned by internal database operations.
const INTERNAL_TABLE_PREFIX: &str = "_vt_";

/// Suffixes of scratch tables left behind by online schema change tooling.
/// All of these also carry a leading underscore.
const SCRATCH_TABLE_SUFFIXES: &[&str] = &["_gho", "_ghc", "_del", "_new", "_old", "_vrepl"];

/// Whether `name` is a scratch table produced by internal operations
/// (online schema change shadow/changelog tables, lifecycle hold tables).
pub fn is_internal_operation_table_name(name: &str) -> bool {
    if name.starts_with(INTERNAL_TABLE_PREFIX) {
        return true;
    }
    name.starts_with('_')
        && SCRATCH_TABLE_SUFFIXES
            .iter()
            .any(|suffix| name.ends_with(suffix))
}
