//! Error types for DAG operations.

use braid_common::BlockHash;

/// Errors surfaced by [`BlockDag`](crate::dag::BlockDag) configuration and
/// query handling. Structural rejections during insertion are not errors;
/// they return an empty result and the caller decides.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// The configured algorithm name is not one of the known protocols.
    #[error("unknown dag type: {0}")]
    UnknownDagType(String),

    /// A block hash referenced by a query is not in the DAG.
    #[error("block not in dag: {hash}")]
    BlockNotFound { hash: BlockHash },
}
