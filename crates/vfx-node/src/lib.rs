//! Node-graph pull engine.
//!
//! Sits on top of [`vfx_cache`]: a [`Node`] asks its [`vfx_cache::NodeCache`]
//! for a row before computing it, and the cache's fingerprint-keyed lookup
//! is what lets two nodes with identical parameters and identical ancestry
//! share one cached row instead of recomputing it twice. [`InputFetcher`]
//! is the one place this crate reaches for parallelism, for operators (like
//! a vertical blur) that need more than one input row per output row.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod fetcher;
pub mod node;

pub use error::{NodeError, NodeResult};
pub use fetcher::{InputFetcher, VerticalBoxBlurOperator};
pub use node::{
    ComputeContext, ConstantFillOperator, Decoder, GradeOperator, GraphNode, ImageInfo, Node, Operator,
    PassThroughOperator,
};

/// Re-exports of the most commonly used types, for `use vfx_node::prelude::*;`.
pub mod prelude {
    pub use crate::error::{NodeError, NodeResult};
    pub use crate::fetcher::InputFetcher;
    pub use crate::node::{ComputeContext, Decoder, GraphNode, Node, Operator};
}
