//! [`Row`]: one horizontal line of pixels across a channel set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::{Channel, ChannelSet};
use crate::lru::CacheEntry;

fn allocate_buffers(x: i32, r: i32, channels: ChannelSet) -> HashMap<Channel, Vec<f32>> {
    let width = (r - x).max(0) as usize;
    let mut buffers = HashMap::new();
    for ch in channels.iter() {
        let fill = if matches!(ch, Channel::Alpha) { 1.0 } else { 0.0 };
        buffers.insert(ch, vec![fill; width]);
    }
    buffers
}

struct RowState {
    x: i32,
    r: i32,
    channels: ChannelSet,
    buffers: HashMap<Channel, Vec<f32>>,
}

struct RowInner {
    y: i32,
    zoomed_y: Option<i32>,
    state: Mutex<RowState>,
    /// Count of outstanding external holders. The cache's own slot in its
    /// map does not bump this — only handles returned to callers do, via
    /// [`Row::from_arc`]. A cache-owned row is free to be destroyed only
    /// once this reaches zero *and* the cache has dropped its own `Arc`.
    ref_count: AtomicUsize,
    cache_owned: bool,
}

/// One horizontal scan-line of pixel data across `[x, r)` for a set of
/// channels, reference-counted and optionally owned by a cache.
pub struct Row {
    inner: Arc<RowInner>,
}

impl Row {
    /// Allocates a new, non-cache-owned row. Alpha is initialised to `1.0`,
    /// every other activated channel to `0.0` (R2); the buffer for each
    /// channel has exactly `r - x` floats (R1).
    pub fn new(x: i32, y: i32, r: i32, channels: ChannelSet) -> Row {
        let inner = Arc::new(RowInner {
            y,
            zoomed_y: None,
            state: Mutex::new(RowState { x, r, channels, buffers: allocate_buffers(x, r, channels) }),
            ref_count: AtomicUsize::new(0),
            cache_owned: false,
        });
        Row::from_arc(&inner)
    }

    /// Builds a cache-owned row together with the `Arc` the cache keeps in
    /// its own map. The returned [`Row`] handle has ref-count 1; the `Arc`
    /// clone held by the cache is a structural reference that does not
    /// itself count.
    pub(crate) fn new_cache_entry(x: i32, y: i32, r: i32, channels: ChannelSet) -> (Arc<RowInner>, Row) {
        let inner = Arc::new(RowInner {
            y,
            zoomed_y: None,
            state: Mutex::new(RowState { x, r, channels, buffers: allocate_buffers(x, r, channels) }),
            ref_count: AtomicUsize::new(0),
            cache_owned: true,
        });
        let handle = Row::from_arc(&inner);
        (inner, handle)
    }

    pub(crate) fn from_arc(inner: &Arc<RowInner>) -> Row {
        inner.ref_count.fetch_add(1, Ordering::AcqRel);
        Row { inner: Arc::clone(inner) }
    }

    /// Image row this line addresses.
    pub fn y(&self) -> i32 {
        self.inner.y
    }

    /// Output y in a scaled viewer, if this row represents a zoomed view.
    pub fn zoomed_y(&self) -> Option<i32> {
        self.inner.zoomed_y
    }

    /// Start column (inclusive).
    pub fn x(&self) -> i32 {
        self.inner.state.lock().x
    }

    /// End column (exclusive).
    pub fn r(&self) -> i32 {
        self.inner.state.lock().r
    }

    /// The row's current channel set.
    pub fn channels(&self) -> ChannelSet {
        self.inner.state.lock().channels
    }

    /// Number of outstanding external holders of this row.
    pub fn ref_count(&self) -> usize {
        self.inner.ref_count.load(Ordering::Acquire)
    }

    /// `true` once no external holder remains.
    pub fn is_removable(&self) -> bool {
        self.ref_count() == 0
    }

    /// Whether the cache owns this row's lifetime (vs. a one-off row the
    /// caller alone is responsible for).
    pub fn is_cache_owned(&self) -> bool {
        self.inner.cache_owned
    }

    /// Copy of `channel`'s data, where `result[column - x]` addresses the
    /// given image column. Returns `None` if `channel` is not active on
    /// this row. Prefer [`with_channel`](Self::with_channel) to avoid the
    /// copy.
    pub fn get(&self, channel: Channel) -> Option<Vec<f32>> {
        self.inner.state.lock().buffers.get(&channel).cloned()
    }

    /// Runs `f` with a read-only view of `channel`'s data, if active.
    pub fn with_channel<R>(&self, channel: Channel, f: impl FnOnce(&[f32]) -> R) -> Option<R> {
        self.inner.state.lock().buffers.get(&channel).map(|buf| f(buf))
    }

    /// Runs `f` with a mutable view of `channel`'s data, if active.
    pub fn with_channel_mut<R>(&self, channel: Channel, f: impl FnOnce(&mut [f32]) -> R) -> Option<R> {
        self.inner.state.lock().buffers.get_mut(&channel).map(|buf| f(buf))
    }

    /// Zeroes `channel`'s buffer, if active.
    pub fn clear_channel(&self, channel: Channel) {
        if let Some(buf) = self.inner.state.lock().buffers.get_mut(&channel) {
            buf.fill(0.0);
        }
    }

    /// Grows the column range to `[new_x, new_r)`. Never shrinks: if
    /// `new_x > x` or `new_r < r` for the current range, those bounds are
    /// clamped to the existing ones (R4). Existing data is preserved at its
    /// original column offsets.
    pub fn widen_range(&self, new_x: i32, new_r: i32) {
        let mut state = self.inner.state.lock();
        let target_x = new_x.min(state.x);
        let target_r = new_r.max(state.r);
        if target_x == state.x && target_r == state.r {
            return;
        }
        let new_width = (target_r - target_x).max(0) as usize;
        let old_x = state.x;
        let channels = state.channels;
        for ch in channels.iter() {
            let old_buf = state.buffers.remove(&ch).unwrap_or_default();
            let fill = if matches!(ch, Channel::Alpha) { 1.0 } else { 0.0 };
            let mut new_buf = vec![fill; new_width];
            let offset = (old_x - target_x) as usize;
            new_buf[offset..offset + old_buf.len()].copy_from_slice(&old_buf);
            state.buffers.insert(ch, new_buf);
        }
        state.x = target_x;
        state.r = target_r;
    }

    /// Copies `other`'s data for `channels` over `[x, r)`, widening this
    /// row's range first if needed and activating any channel in
    /// `channels` that isn't yet active.
    pub fn copy_from(&self, other: &Row, channels: ChannelSet, x: i32, r: i32) {
        self.widen_range(x, r);
        let mut dst = self.inner.state.lock();
        let other_state = other.inner.state.lock();
        let (dst_x, dst_r) = (dst.x, dst.r);
        let dst_width = (dst_r - dst_x).max(0) as usize;
        for ch in channels.iter() {
            let Some(src_buf) = other_state.buffers.get(&ch) else { continue };
            dst.channels.insert(ch);
            let fill = if matches!(ch, Channel::Alpha) { 1.0 } else { 0.0 };
            let dst_buf = dst.buffers.entry(ch).or_insert_with(|| vec![fill; dst_width]);
            for col in x..r {
                let src_idx = col - other_state.x;
                let dst_idx = col - dst_x;
                if src_idx < 0 || src_idx as usize >= src_buf.len() {
                    continue;
                }
                if dst_idx < 0 || dst_idx as usize >= dst_buf.len() {
                    continue;
                }
                dst_buf[dst_idx as usize] = src_buf[src_idx as usize];
            }
        }
    }

    /// Composes the row cache key for `(node_hash, filename, x, r, y)` using
    /// the fixed fingerprint algorithm.
    pub fn hash_key(node_hash: u64, filename: &str, x: i32, r: i32, y: i32) -> u64 {
        let mut hash = vfx_hash::Hash::new();
        hash.append(node_hash);
        hash.append_string(filename);
        hash.append(x as u64);
        hash.append(r as u64);
        hash.append(y as u64);
        hash.compute()
    }
}

impl Clone for Row {
    fn clone(&self) -> Self {
        Row::from_arc(&self.inner)
    }
}

impl Drop for Row {
    fn drop(&mut self) {
        self.inner.ref_count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl CacheEntry for Row {
    fn is_removable(&self) -> bool {
        Row::is_removable(self)
    }

    fn size_bytes(&self) -> usize {
        let state = self.inner.state.lock();
        state.buffers.values().map(|b| b.len() * std::mem::size_of::<f32>()).sum()
    }
}

/// Arc handle type the cache stores internally, distinct from the public
/// [`Row`] handle so that holding it does not bump the logical ref-count.
pub(crate) type RowEntryArc = Arc<RowInner>;

impl CacheEntry for RowEntryArc {
    fn is_removable(&self) -> bool {
        self.ref_count.load(Ordering::Acquire) == 0
    }

    fn size_bytes(&self) -> usize {
        let state = self.state.lock();
        state.buffers.values().map(|b| b.len() * std::mem::size_of::<f32>()).sum()
    }
}

impl RowEntryArc {
    /// Builds a new [`Row`] handle to this entry, bumping its ref-count.
    pub(crate) fn to_handle(&self) -> Row {
        Row::from_arc(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_row_has_exact_width_buffers() {
        let row = Row::new(0, 5, 64, ChannelSet::rgba());
        row.with_channel(Channel::Red, |buf| assert_eq!(buf.len(), 64));
    }

    #[test]
    fn alpha_inits_to_one_others_to_zero() {
        let row = Row::new(0, 5, 4, ChannelSet::rgba());
        row.with_channel(Channel::Alpha, |buf| assert!(buf.iter().all(|&v| v == 1.0)));
        row.with_channel(Channel::Red, |buf| assert!(buf.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn widen_range_never_shrinks_and_preserves_data() {
        let row = Row::new(10, 0, 20, ChannelSet::from_iter([Channel::Red]));
        row.with_channel_mut(Channel::Red, |buf| buf.fill(7.0));
        row.widen_range(5, 15); // narrower on the right, wider on the left
        assert_eq!(row.x(), 5);
        assert_eq!(row.r(), 20); // r must not shrink below the old r
        row.with_channel(Channel::Red, |buf| {
            // original [10,20) data preserved at offset 5
            assert!(buf[5..15].iter().all(|&v| v == 7.0));
        });
    }

    #[test]
    fn non_cached_row_destroyed_when_last_handle_drops() {
        let row = Row::new(0, 0, 1, ChannelSet::from_iter([Channel::Red]));
        assert_eq!(row.ref_count(), 1);
        let clone = row.clone();
        assert_eq!(row.ref_count(), 2);
        drop(clone);
        assert_eq!(row.ref_count(), 1);
    }

    #[test]
    fn cache_entry_stays_alive_after_handles_drop() {
        let (entry_arc, handle) = Row::new_cache_entry(0, 0, 8, ChannelSet::rgba());
        drop(handle);
        assert!(entry_arc.is_removable());
        // The Arc the "cache" is holding is still valid memory.
        assert_eq!(entry_arc.y, 0);
    }

    #[test]
    fn hash_key_is_deterministic_and_position_sensitive() {
        let k1 = Row::hash_key(42, "f.exr", 0, 64, 3);
        let k2 = Row::hash_key(42, "f.exr", 0, 64, 3);
        let k3 = Row::hash_key(42, "f.exr", 0, 64, 4);
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
