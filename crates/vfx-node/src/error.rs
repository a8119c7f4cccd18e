//! Error types for the pull engine.

use thiserror::Error;

/// Error produced while pulling a row through the graph.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The cache layer failed (allocation, mapping, or I/O).
    #[error(transparent)]
    Cache(#[from] vfx_cache::CacheError),

    /// A decoder could not produce data for the requested region.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// An operator's `compute` failed.
    #[error("compute failed: {0}")]
    ComputeFailed(String),

    /// A parent's pull failed; the failure is propagated without retrying.
    #[error("upstream pull failed: {0}")]
    UpstreamFailed(Box<NodeError>),
}

/// Result type for pull-engine operations.
pub type NodeResult<T> = Result<T, NodeError>;
