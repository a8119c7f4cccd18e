//! The `Node`/`Operator`/`Decoder` traits that make up the pull engine.

use std::path::Path;
use std::sync::Arc;

use vfx_cache::{Channel, ChannelSet, NodeCache, Row};
use vfx_core::Rect;

use crate::error::{NodeError, NodeResult};

/// Metadata a [`Decoder`] reports about the file it opens, before any pixel
/// data is read.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Channels present in the file.
    pub channels: ChannelSet,
    /// Full data window.
    pub data_window: Rect,
    /// Display window (may differ from the data window for letterboxed or
    /// overscanned sources).
    pub display_window: Rect,
    /// `true` if row `y` increases downward in the file's native storage
    /// order.
    pub y_increasing: bool,
    /// Inclusive frame range available from this source.
    pub frame_range: (i32, i32),
}

/// An external image source: the only place file-format specifics enter
/// the pull engine.
pub trait Decoder: Send + Sync {
    /// Reads header metadata without decoding pixels.
    fn open_header(&self, path: &Path) -> NodeResult<ImageInfo>;

    /// Decodes `roi` of `frame` into `row`. `row`'s active channels and
    /// column range determine what gets filled.
    fn decode(&self, path: &Path, frame: i32, roi: Rect, row: &Row) -> NodeResult<()>;
}

/// Everything [`Operator::compute`] needs to fill a row: which node is
/// computing, the cache its parents should pull through, and the requested
/// region.
pub struct ComputeContext<'a> {
    /// The node this compute call is running for (gives access to parents).
    pub node: &'a dyn Node,
    /// The row cache parent pulls should go through.
    pub cache: &'a NodeCache,
    /// Row to fill.
    pub y: i32,
    /// Start column (inclusive).
    pub x: i32,
    /// End column (exclusive).
    pub r: i32,
    /// Requested channels.
    pub channels: ChannelSet,
}

/// The math of a single graph node, decoupled from cache plumbing and
/// parent bookkeeping (both of which [`Node::produce_row`] handles).
pub trait Operator: Send + Sync {
    /// Stable name folded into this node's fingerprint, distinguishing
    /// otherwise-identical parameter sets belonging to different operators.
    fn class_name(&self) -> &'static str;

    /// This operator's own parameters, folded into the node's fingerprint.
    /// Order matters: callers must keep it stable across calls for a given
    /// parameter set.
    fn fingerprint_params(&self) -> Vec<u64>;

    /// Which upstream channels on `input_index` are needed to produce
    /// `downstream_mask` on this operator's own output. The identity
    /// mapping is correct for most single-input color operators.
    fn in_channels(&self, _input_index: usize, downstream_mask: ChannelSet) -> ChannelSet {
        downstream_mask
    }

    /// Fills `row` over `[ctx.x, ctx.r)` at `ctx.y` for `ctx.channels`. The
    /// only place this operator's math runs; free to call
    /// `ctx.node.parents()[i].produce_row(...)` or build an
    /// [`crate::InputFetcher`] over a parent to gather several rows at once.
    fn compute(&self, ctx: &ComputeContext, row: &Row) -> NodeResult<()>;
}

/// One node in the pull graph: an [`Operator`] plus its upstream nodes.
///
/// `produce_row` is the only entry point a consumer (a viewer, a writer, or
/// another node acting as a consumer) needs; it implements the full
/// fingerprint -> cache lookup -> compute -> return contract.
pub trait Node: Send + Sync {
    /// This node's operator.
    fn operator(&self) -> &dyn Operator;

    /// Upstream nodes, in input-index order.
    fn parents(&self) -> &[Arc<dyn Node>];

    /// The source filename this node's rows should be keyed against, if
    /// this node (or one of its ordinary non-spatial ancestors) reads a
    /// file directly. `None` for purely synthetic nodes.
    fn current_filename(&self) -> Option<String> {
        None
    }

    /// Whether rows this node produces should be placed in the [`NodeCache`]
    /// at all. Nodes that are trivially cheap to recompute (a constant
    /// fill, a pass-through) may return `false` to skip the bookkeeping.
    fn is_cache_worthy(&self) -> bool {
        true
    }

    /// Folds this node's own parameters with its parents' fingerprints.
    /// Recomputed on every call rather than memoized: a node-graph editor
    /// can change a parameter between any two calls, and recomputation is
    /// the only way to guarantee the cascade in the tree-hash invariant
    /// without also having to track downstream dirtiness explicitly.
    fn fingerprint(&self) -> u64 {
        let parent_fingerprints: Vec<u64> = self.parents().iter().map(|p| p.fingerprint()).collect();
        vfx_hash::fingerprint_node(
            &self.operator().fingerprint_params(),
            self.operator().class_name(),
            &parent_fingerprints,
        )
    }

    /// Produces the row at `(y, [x, r))` for `channels`, consulting and
    /// populating `cache` along the way.
    fn produce_row(&self, cache: &NodeCache, y: i32, x: i32, r: i32, channels: ChannelSet) -> NodeResult<Row> {
        let fingerprint = self.fingerprint();
        let filename = self.current_filename().unwrap_or_default();
        let (key, hit) = cache.get(fingerprint, &filename, x, r, y);
        if let Some(row) = hit {
            return Ok(row);
        }

        let cache_worthy = self.is_cache_worthy();
        let row = if cache_worthy {
            cache
                .add_row(key, x, r, y, channels, &filename)
                .ok_or_else(|| NodeError::ComputeFailed("row allocation failed".into()))?
        } else {
            Row::new(x, y, r, channels)
        };

        let ctx = ComputeContext { node: self, cache, y, x, r, channels };
        match self.operator().compute(&ctx, &row) {
            Ok(()) => Ok(row),
            Err(err) => {
                drop(row);
                if cache_worthy {
                    cache.remove_key(key);
                }
                Err(err)
            }
        }
    }
}

/// A concrete, general-purpose node: one [`Operator`] plus its parents.
/// Sufficient for every demo operator in this crate; a full host
/// application might add its own `Node` implementations for node types
/// with extra state (e.g. a reader tracking its open file handle).
pub struct GraphNode {
    operator: Box<dyn Operator>,
    parents: Vec<Arc<dyn Node>>,
    filename: Option<String>,
    cache_worthy: bool,
}

impl GraphNode {
    /// Builds a cache-worthy node with no source filename.
    pub fn new(operator: Box<dyn Operator>, parents: Vec<Arc<dyn Node>>) -> Self {
        GraphNode { operator, parents, filename: None, cache_worthy: true }
    }

    /// Attaches a source filename, used to key this node's rows separately
    /// per file.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Marks this node as not cache-worthy (see [`Node::is_cache_worthy`]).
    pub fn without_caching(mut self) -> Self {
        self.cache_worthy = false;
        self
    }
}

impl Node for GraphNode {
    fn operator(&self) -> &dyn Operator {
        self.operator.as_ref()
    }

    fn parents(&self) -> &[Arc<dyn Node>] {
        &self.parents
    }

    fn current_filename(&self) -> Option<String> {
        self.filename.clone()
    }

    fn is_cache_worthy(&self) -> bool {
        self.cache_worthy
    }
}

/// Fills every activated channel with a constant value; alpha defaults to
/// `1.0` from [`Row::new`]/[`NodeCache::add_row`] so it is left untouched
/// unless explicitly included in `value`.
pub struct ConstantFillOperator {
    /// Channels this operator writes.
    pub channels: ChannelSet,
    /// Value written to every activated channel.
    pub value: f32,
}

impl Operator for ConstantFillOperator {
    fn class_name(&self) -> &'static str {
        "ConstantFill"
    }

    fn fingerprint_params(&self) -> Vec<u64> {
        vec![self.value.to_bits() as u64, self.channels_bits()]
    }

    fn compute(&self, ctx: &ComputeContext, row: &Row) -> NodeResult<()> {
        for ch in ctx.channels.iter() {
            if self.channels.contains(ch) {
                row.with_channel_mut(ch, |buf| buf.fill(self.value));
            }
        }
        Ok(())
    }
}

impl ConstantFillOperator {
    fn channels_bits(&self) -> u64 {
        self.channels.iter().fold(0u64, |acc, ch| acc | (1 << ch as u64))
    }
}

/// Copies its single parent's row verbatim over the requested channels.
pub struct PassThroughOperator;

impl Operator for PassThroughOperator {
    fn class_name(&self) -> &'static str {
        "PassThrough"
    }

    fn fingerprint_params(&self) -> Vec<u64> {
        Vec::new()
    }

    fn compute(&self, ctx: &ComputeContext, row: &Row) -> NodeResult<()> {
        let parent = ctx
            .node
            .parents()
            .first()
            .ok_or_else(|| NodeError::ComputeFailed("PassThrough requires one parent".into()))?;
        let parent_row = parent
            .produce_row(ctx.cache, ctx.y, ctx.x, ctx.r, ctx.channels)
            .map_err(|e| NodeError::UpstreamFailed(Box::new(e)))?;
        row.copy_from(&parent_row, ctx.channels, ctx.x, ctx.r);
        Ok(())
    }
}

/// A per-pixel scale/offset grade applied to color channels; alpha passes
/// through unmodified.
pub struct GradeOperator {
    /// Multiplicative factor.
    pub scale: f32,
    /// Additive offset, applied after scaling.
    pub offset: f32,
}

impl Operator for GradeOperator {
    fn class_name(&self) -> &'static str {
        "Grade"
    }

    fn fingerprint_params(&self) -> Vec<u64> {
        vec![self.scale.to_bits() as u64, self.offset.to_bits() as u64]
    }

    fn compute(&self, ctx: &ComputeContext, row: &Row) -> NodeResult<()> {
        let parent = ctx
            .node
            .parents()
            .first()
            .ok_or_else(|| NodeError::ComputeFailed("Grade requires one parent".into()))?;
        let parent_row = parent
            .produce_row(ctx.cache, ctx.y, ctx.x, ctx.r, ctx.channels)
            .map_err(|e| NodeError::UpstreamFailed(Box::new(e)))?;
        row.copy_from(&parent_row, ctx.channels, ctx.x, ctx.r);
        for ch in ctx.channels.iter() {
            if matches!(ch, Channel::Alpha) {
                continue;
            }
            row.with_channel_mut(ch, |buf| {
                for v in buf.iter_mut() {
                    *v = *v * self.scale + self.offset;
                }
            });
        }
        Ok(())
    }
}
