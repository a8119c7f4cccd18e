//! Error types for the row/frame cache.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Cache operation error.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A path expected to exist on disk was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Memory-mapping a file failed.
    #[error("failed to map file: {}", .0.display())]
    MapFailed(PathBuf),

    /// A heap or mapped allocation could not be satisfied.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// The on-disk cache manifest or data files are inconsistent.
    #[error("cache corrupt: {0}")]
    CacheCorrupt(String),

    /// A decoder or operator failed to produce data for an entry.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// The requested key has no entry in the cache.
    #[error("not cached")]
    NotCached,
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
