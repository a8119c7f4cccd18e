//! # vfx-core
//!
//! Geometric primitives shared across the VFX-RS cache and node-graph crates.
//!
//! This crate provides the foundational region types used to describe image
//! windows and cache texture rectangles:
//!
//! - [`Rect`] - a rectangle with origin and dimensions
//! - [`Roi`] - a region of interest, optionally unbounded
//!
//! ## Crate Structure
//!
//! `vfx-core` has no internal dependencies. It is depended on by:
//!
//! ```text
//! vfx-core (this crate)
//!    ^
//!    +-- vfx-cache  (FrameEntry data/display windows, texture rects)
//!    +-- vfx-node   (pull-engine row ranges)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod rect;

pub use rect::*;

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```
/// use vfx_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::rect::{Rect, Roi};
}
