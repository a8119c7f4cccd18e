//! [`FrameEntry`]: one presentation-ready, disk-backed viewer tile.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use vfx_core::Rect;

use crate::channel::ChannelSet;
use crate::error::CacheResult;
use crate::lru::CacheEntry;
use crate::mmap_file::{MemoryFile, OpenMode};

/// The cached texture rectangle of a frame: a display-space sub-region plus
/// its pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRect {
    /// Left edge.
    pub x: i32,
    /// Bottom edge.
    pub y: i32,
    /// Right edge (exclusive).
    pub r: i32,
    /// Top edge (exclusive).
    pub t: i32,
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

impl TextureRect {
    /// Bytes required to store this rectangle: `w * h * (4 or 16)`,
    /// depending on `byte_mode` (F1).
    pub fn byte_count(&self, byte_mode: bool) -> u64 {
        let bytes_per_pixel: u64 = if byte_mode { 4 } else { 16 };
        self.w as u64 * self.h as u64 * bytes_per_pixel
    }
}

enum FileState {
    Mapped(MemoryFile),
    Unmapped,
}

struct FrameEntryInner {
    path: PathBuf,
    exposure: f32,
    lut: String,
    zoom: f32,
    tree_version: u64,
    byte_mode: bool,
    data_window: Rect,
    display_window: Rect,
    channels: ChannelSet,
    texture_rect: TextureRect,
    file: Mutex<FileState>,
    ref_count: AtomicUsize,
}

/// A fully rendered, display-adjusted image tile held by the viewer cache.
pub struct FrameEntry {
    inner: Arc<FrameEntryInner>,
}

/// Parameters needed to allocate a new frame's backing file.
pub struct FrameParams {
    /// Destination path for the mapped data file.
    pub path: PathBuf,
    /// Exposure adjustment baked into this frame.
    pub exposure: f32,
    /// LUT identifier applied to this frame.
    pub lut: String,
    /// Zoom factor this frame was rendered at.
    pub zoom: f32,
    /// Upstream tree fingerprint at render time.
    pub tree_version: u64,
    /// `true` for 8-bit/channel storage, `false` for 32-bit float.
    pub byte_mode: bool,
    /// Full data window of the upstream image.
    pub data_window: Rect,
    /// Display window of the upstream image.
    pub display_window: Rect,
    /// Channels baked into this frame.
    pub channels: ChannelSet,
    /// Cached texture rectangle.
    pub texture_rect: TextureRect,
}

impl FrameEntry {
    /// Allocates a mapped file sized exactly to the texture rectangle and
    /// wraps it as a new, cache-owned frame entry. Returns both the `Arc`
    /// the cache stores internally and the handle (ref-count 1) returned to
    /// the caller, mirroring [`Row::new_cache_entry`](crate::Row).
    pub fn allocate(params: FrameParams) -> CacheResult<(Arc<FrameEntryInner>, FrameEntry)> {
        let byte_count = params.texture_rect.byte_count(params.byte_mode);
        let file = MemoryFile::open(&params.path, OpenMode::KeepOrCreate, byte_count)?;
        let inner = Arc::new(FrameEntryInner {
            path: params.path,
            exposure: params.exposure,
            lut: params.lut,
            zoom: params.zoom,
            tree_version: params.tree_version,
            byte_mode: params.byte_mode,
            data_window: params.data_window,
            display_window: params.display_window,
            channels: params.channels,
            texture_rect: params.texture_rect,
            file: Mutex::new(FileState::Mapped(file)),
            ref_count: AtomicUsize::new(0),
        });
        let handle = FrameEntry::from_arc(&inner);
        Ok((inner, handle))
    }

    pub(crate) fn from_arc(inner: &Arc<FrameEntryInner>) -> FrameEntry {
        inner.ref_count.fetch_add(1, Ordering::AcqRel);
        FrameEntry { inner: Arc::clone(inner) }
    }

    /// Path of the backing data file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Exact byte size the mapped file must have (F1).
    pub fn expected_byte_count(&self) -> u64 {
        self.inner.texture_rect.byte_count(self.inner.byte_mode)
    }

    /// `true` if the entry's backing file is currently memory-mapped.
    pub fn is_mapped(&self) -> bool {
        matches!(&*self.inner.file.lock(), FileState::Mapped(_))
    }

    /// Number of outstanding external holders.
    pub fn ref_count(&self) -> usize {
        self.inner.ref_count.load(Ordering::Acquire)
    }

    /// `true` once no external holder remains.
    pub fn is_removable(&self) -> bool {
        self.ref_count() == 0
    }

    /// The frame's texture rectangle.
    pub fn texture_rect(&self) -> TextureRect {
        self.inner.texture_rect
    }

    /// The frame's exposure.
    pub fn exposure(&self) -> f32 {
        self.inner.exposure
    }

    /// The frame's LUT identifier.
    pub fn lut(&self) -> &str {
        &self.inner.lut
    }

    /// The frame's zoom factor.
    pub fn zoom(&self) -> f32 {
        self.inner.zoom
    }

    /// The upstream tree fingerprint this frame was rendered against.
    pub fn tree_version(&self) -> u64 {
        self.inner.tree_version
    }

    /// `true` for 8-bit/channel storage.
    pub fn byte_mode(&self) -> bool {
        self.inner.byte_mode
    }

    /// The channel set baked into this frame.
    pub fn channels(&self) -> ChannelSet {
        self.inner.channels
    }

    /// Unmaps the backing file in place without unlinking it, dropping this
    /// entry from RAM while leaving it present on disk. A no-op if already
    /// unmapped.
    pub fn demote(&self) -> CacheResult<()> {
        demote_inner(&self.inner)
    }

    /// Re-opens the backing file (which must already exist) and maps it
    /// back into RAM.
    pub fn remap(&self) -> CacheResult<()> {
        remap_inner(&self.inner)
    }

    /// Composes the viewer cache key from a frame's identity: frame number,
    /// upstream tree version, zoom, exposure, LUT, byte-mode, data/display
    /// windows, and the cached texture rectangle.
    #[allow(clippy::too_many_arguments)]
    pub fn hash_key(
        frame_number: i32,
        tree_version: u64,
        zoom: f32,
        exposure: f32,
        lut: &str,
        byte_mode: bool,
        data_window: Rect,
        display_window: Rect,
        texture_rect: TextureRect,
    ) -> u64 {
        let mut hash = vfx_hash::Hash::new();
        hash.append(frame_number as u64);
        hash.append(tree_version);
        hash.append(zoom.to_bits() as u64);
        hash.append(exposure.to_bits() as u64);
        hash.append_string(lut);
        hash.append(byte_mode as u64);
        for rect in [data_window, display_window] {
            hash.append(rect.x as u64);
            hash.append(rect.y as u64);
            hash.append(rect.width as u64);
            hash.append(rect.height as u64);
        }
        hash.append(texture_rect.x as u64);
        hash.append(texture_rect.y as u64);
        hash.append(texture_rect.r as u64);
        hash.append(texture_rect.t as u64);
        hash.append(texture_rect.w as u64);
        hash.append(texture_rect.h as u64);
        hash.compute()
    }
}

fn demote_inner(inner: &FrameEntryInner) -> CacheResult<()> {
    let mut file = inner.file.lock();
    if let FileState::Mapped(mapped) = &*file {
        mapped.flush()?;
    }
    *file = FileState::Unmapped;
    Ok(())
}

fn remap_inner(inner: &FrameEntryInner) -> CacheResult<()> {
    let mut file = inner.file.lock();
    if matches!(&*file, FileState::Mapped(_)) {
        return Ok(());
    }
    let byte_count = inner.texture_rect.byte_count(inner.byte_mode);
    let mapped = MemoryFile::open(&inner.path, OpenMode::KeepOrFail, byte_count)?;
    *file = FileState::Mapped(mapped);
    Ok(())
}

impl Clone for FrameEntry {
    fn clone(&self) -> Self {
        FrameEntry::from_arc(&self.inner)
    }
}

impl Drop for FrameEntry {
    fn drop(&mut self) {
        self.inner.ref_count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CacheEntry for FrameEntry {
    fn is_removable(&self) -> bool {
        FrameEntry::is_removable(self)
    }

    fn size_bytes(&self) -> usize {
        self.expected_byte_count() as usize
    }
}

/// Arc handle type the cache stores internally.
pub(crate) type FrameEntryArc = Arc<FrameEntryInner>;

impl CacheEntry for FrameEntryArc {
    fn is_removable(&self) -> bool {
        self.ref_count.load(Ordering::Acquire) == 0
    }

    fn size_bytes(&self) -> usize {
        self.texture_rect.byte_count(self.byte_mode) as usize
    }
}

impl FrameEntryArc {
    /// Builds a handle to this entry without going through
    /// [`FrameEntry::allocate`] (used when a lookup finds an existing Arc).
    pub(crate) fn to_handle(&self) -> FrameEntry {
        FrameEntry::from_arc(self)
    }

    /// Unmaps this entry's backing file without going through a [`FrameEntry`]
    /// handle, for use by the set that holds the Arc directly.
    pub(crate) fn demote(&self) -> CacheResult<()> {
        demote_inner(self)
    }

    /// Re-maps this entry's backing file in place.
    pub(crate) fn remap(&self) -> CacheResult<()> {
        remap_inner(self)
    }

    /// Path of the backing data file.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The cached texture rectangle.
    pub(crate) fn texture_rect(&self) -> TextureRect {
        self.texture_rect
    }

    /// The frame's exposure.
    pub(crate) fn exposure(&self) -> f32 {
        self.exposure
    }

    /// The frame's LUT identifier.
    pub(crate) fn lut(&self) -> &str {
        &self.lut
    }

    /// The frame's zoom factor.
    pub(crate) fn zoom(&self) -> f32 {
        self.zoom
    }

    /// The upstream tree fingerprint.
    pub(crate) fn tree_version(&self) -> u64 {
        self.tree_version
    }

    /// `true` for 8-bit/channel storage.
    pub(crate) fn byte_mode(&self) -> bool {
        self.byte_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn texture_rect() -> TextureRect {
        TextureRect { x: 0, y: 0, r: 64, t: 64, w: 64, h: 64 }
    }

    fn params(path: PathBuf) -> FrameParams {
        FrameParams {
            path,
            exposure: 0.0,
            lut: "linear".into(),
            zoom: 1.0,
            tree_version: 42,
            byte_mode: true,
            data_window: Rect::new(0, 0, 64, 64),
            display_window: Rect::new(0, 0, 64, 64),
            channels: ChannelSet::rgba(),
            texture_rect: texture_rect(),
        }
    }

    #[test]
    fn byte_count_matches_mapped_file_size() {
        let dir = tempdir().unwrap();
        let (_, entry) = FrameEntry::allocate(params(dir.path().join("0.powc"))).unwrap();
        assert_eq!(entry.expected_byte_count(), 64 * 64 * 4);
    }

    #[test]
    fn demote_then_remap_round_trips() {
        let dir = tempdir().unwrap();
        let (_, entry) = FrameEntry::allocate(params(dir.path().join("0.powc"))).unwrap();
        assert!(entry.is_mapped());
        entry.demote().unwrap();
        assert!(!entry.is_mapped());
        entry.remap().unwrap();
        assert!(entry.is_mapped());
    }

    #[test]
    fn hash_key_is_order_sensitive_on_lut_and_exposure() {
        let dw = Rect::new(0, 0, 64, 64);
        let tr = texture_rect();
        let a = FrameEntry::hash_key(1, 7, 1.0, 0.0, "linear", true, dw, dw, tr);
        let b = FrameEntry::hash_key(1, 7, 1.0, 0.0, "log", true, dw, dw, tr);
        assert_ne!(a, b);
    }
}
