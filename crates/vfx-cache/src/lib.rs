//! # vfx-cache
//!
//! The content-addressed, two-tier row/frame cache beneath a node-graph
//! compositor's pull engine.
//!
//! - [`Row`] / [`NodeCache`] — the in-memory row cache every node's
//!   `produce_row` consults first.
//! - [`FrameEntry`] / [`ViewerCache`] — the disk-backed, display-ready
//!   frame cache, with an in-RAM mapped sub-set over a disk set.
//! - [`MemoryFile`] — the RAII mapped-file primitive both caches build on.
//! - [`LruContainer`] — the generic pin-aware eviction container shared by
//!   both caches.
//!
//! ## Crate Structure
//!
//! ```text
//! vfx-core (Rect, Roi)
//! vfx-hash (fingerprint fold)
//!    ^
//!    +-- vfx-cache (this crate)
//!           ^
//!           +-- vfx-node (pull engine, InputFetcher)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channel;
pub mod error;
pub mod frame;
pub mod lru;
pub mod mmap_file;
pub mod node_cache;
pub mod row;
pub mod viewer_cache;

pub use channel::{Channel, ChannelSet};
pub use error::{CacheError, CacheResult};
pub use frame::{FrameEntry, FrameParams, TextureRect};
pub use lru::{CacheEntry, LruContainer};
pub use mmap_file::{MemoryFile, OpenMode};
pub use node_cache::{CacheStats, NodeCache};
pub use row::Row;
pub use viewer_cache::{ViewerCache, ViewerCacheConfig, ViewerKey};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        CacheEntry, CacheError, CacheResult, CacheStats, Channel, ChannelSet, FrameEntry,
        FrameParams, LruContainer, MemoryFile, NodeCache, OpenMode, Row, TextureRect, ViewerCache,
        ViewerCacheConfig, ViewerKey,
    };
}
