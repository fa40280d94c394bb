//! Error taxonomy for the control plane.
//!
//! Classification drives operator messaging: a `Precondition` failure means
//! the cluster is in a state the operation refuses to touch, a `Topology` or
//! `Rpc` failure means a collaborator call failed, and an `Aggregate` carries
//! one error per shard from a fan-out phase. Context is attached by wrapping
//! (`with_context`), never by rewriting the underlying variant, so
//! classification survives `"phase <name>: <cause>"` prefixes.

use std::fmt;

use thiserror::Error;

/// Convenience alias for `Result<T, ShrikeError>`.
pub type ShrikeResult<T> = Result<T, ShrikeError>;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cluster state violates an operation precondition; operator must
    /// intervene before a retry can succeed.
    Precondition,
    /// Topology-store lookup failure.
    Topology,
    /// Tablet RPC failure.
    Rpc,
    /// Shard-set validation rejection (gaps, overlaps, unequal spans).
    Validation,
    /// One error per failing shard from a fan-out phase.
    Aggregate,
    /// The caller's cancellation token fired mid-call.
    Cancelled,
    /// Should not happen.
    Internal,
}

/// Top-level error type that all control-plane errors convert into.
#[derive(Error, Debug)]
pub enum ShrikeError {
    #[error("{0}")]
    Precondition(String),

    #[error("topology error: {0}")]
    Topo(#[from] TopoError),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Aggregate(#[from] AggregateError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    /// Context wrapper; classification delegates to the wrapped error.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ShrikeError>,
    },
}

/// Topology-store lookup failures.
#[derive(Error, Debug)]
pub enum TopoError {
    #[error("shard {keyspace}/{shard} not found")]
    ShardNotFound { keyspace: String, shard: String },

    #[error("tablet {0} not found")]
    TabletNotFound(String),

    #[error("vschema for keyspace {0} not found")]
    VSchemaNotFound(String),

    #[error("topology lookup failed: {0}")]
    Lookup(String),
}

/// Tablet RPC failures.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("tablet {tablet} unreachable: {reason}")]
    Unreachable { tablet: String, reason: String },

    #[error("query failed on tablet {tablet}: {reason}")]
    QueryFailed { tablet: String, reason: String },
}

/// Zero-or-more underlying errors from a fan-out phase, in unspecified
/// order. Never constructed empty.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<ShrikeError>,
}

impl AggregateError {
    pub fn new(errors: Vec<ShrikeError>) -> Self {
        debug_assert!(!errors.is_empty());
        Self { errors }
    }

    pub fn errors(&self) -> &[ShrikeError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for e in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{e}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl ShrikeError {
    /// Classify this error. Context wrappers are transparent.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShrikeError::Precondition(_) => ErrorKind::Precondition,
            ShrikeError::Topo(_) => ErrorKind::Topology,
            ShrikeError::Rpc(_) => ErrorKind::Rpc,
            ShrikeError::Validation(_) => ErrorKind::Validation,
            ShrikeError::Aggregate(_) => ErrorKind::Aggregate,
            ShrikeError::Cancelled => ErrorKind::Cancelled,
            ShrikeError::Internal(_) => ErrorKind::Internal,
            ShrikeError::Context { source, .. } => source.kind(),
        }
    }

    /// Wrap with a context prefix, preserving classification.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        ShrikeError::Context {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        ShrikeError::Precondition(msg.into())
    }
}

/// Add context to a `Result`, preserving error classification.
/// Usage: `topo.get_shard(ks, name).await.ctx("GetShard(-80) failed")?`
pub trait ErrorContext<T> {
    fn ctx(self, context: &str) -> ShrikeResult<T>;
    fn ctx_with(self, f: impl FnOnce() -> String) -> ShrikeResult<T>;
}

impl<T, E: Into<ShrikeError>> ErrorContext<T> for Result<T, E> {
    fn ctx(self, context: &str) -> ShrikeResult<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn ctx_with(self, f: impl FnOnce() -> String) -> ShrikeResult<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ShrikeError::precondition("bad state").kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            ShrikeError::from(TopoError::VSchemaNotFound("ks".into())).kind(),
            ErrorKind::Topology
        );
        assert_eq!(
            ShrikeError::from(RpcError::Unreachable {
                tablet: "zone1-0000000100".into(),
                reason: "connection refused".into(),
            })
            .kind(),
            ErrorKind::Rpc
        );
        assert_eq!(ShrikeError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_context_preserves_classification() {
        let e = ShrikeError::precondition("target shard is serving")
            .with_context("phase build");
        assert_eq!(e.kind(), ErrorKind::Precondition);
        let s = e.to_string();
        assert!(s.contains("phase build"));
        assert!(s.contains("target shard is serving"));
    }

    #[test]
    fn test_nested_context_stacks_prefixes() {
        let e = ShrikeError::from(TopoError::ShardNotFound {
            keyspace: "ks".into(),
            shard: "-80".into(),
        })
        .with_context("GetShard(-80) failed")
        .with_context("phase build");
        assert_eq!(e.kind(), ErrorKind::Topology);
        assert_eq!(
            e.to_string(),
            "phase build: GetShard(-80) failed: topology error: shard ks/-80 not found"
        );
    }

    #[test]
    fn test_aggregate_display_joins_causes() {
        let agg = AggregateError::new(vec![
            ShrikeError::precondition("a"),
            ShrikeError::precondition("b"),
        ]);
        assert_eq!(agg.to_string(), "a; b");
        assert_eq!(agg.len(), 2);
        assert_eq!(ShrikeError::from(agg).kind(), ErrorKind::Aggregate);
    }

    #[test]
    fn test_ctx_trait_on_result() {
        let res: Result<(), TopoError> = Err(TopoError::TabletNotFound("zone1-1".into()));
        let err = res.ctx("GetTablet failed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Topology);
        assert!(err.to_string().starts_with("GetTablet failed: "));
    }
}
