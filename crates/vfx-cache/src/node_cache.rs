//! `NodeCache`: the process-wide in-memory row cache.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::channel::ChannelSet;
use crate::lru::{CacheEntry, LruContainer};
use crate::row::{Row, RowEntryArc};

/// Point-in-time cache statistics, exposed for observability. Purely
/// additive bookkeeping: nothing here participates in key composition or
/// eviction policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed by eviction.
    pub evictions: u64,
    /// Largest `current_size()` observed so far.
    pub peak_size: usize,
}

impl CacheStats {
    /// Hit rate in `[0.0, 1.0]`; `0.0` when there have been no lookups yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct State {
    rows: LruContainer<u64, RowEntryArc>,
    /// Reverse index from source filename to the keys derived from it, so
    /// `invalidate` can drop a decoder's stale rows without clearing the
    /// whole cache.
    keys_by_filename: HashMap<String, Vec<u64>>,
    capacity: usize,
    stats: CacheStats,
}

/// The process-wide row cache consulted by every node's `produce_row`.
///
/// Keyed by `(node_fingerprint, filename, x, r, y)` folded through
/// [`Row::hash_key`]. One process normally holds a single instance; tests
/// construct independent instances freely (the "singleton" in the original
/// design is modeled here as an ordinary value behind a context handle, per
/// the recommended reimplementation shape).
pub struct NodeCache {
    state: Mutex<State>,
}

impl NodeCache {
    /// Creates an empty cache with the given byte capacity.
    pub fn new(capacity: usize) -> Self {
        NodeCache {
            state: Mutex::new(State {
                rows: LruContainer::new(),
                keys_by_filename: HashMap::new(),
                capacity,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Composes the row key and looks it up, touching it on a hit.
    pub fn get(
        &self,
        node_fingerprint: u64,
        filename: &str,
        x: i32,
        r: i32,
        y: i32,
    ) -> (u64, Option<Row>) {
        let key = Row::hash_key(node_fingerprint, filename, x, r, y);
        let mut state = self.state.lock();
        match state.rows.lookup(&key) {
            Some(entry) => {
                let handle = entry.to_handle();
                state.stats.hits += 1;
                (key, Some(handle))
            }
            None => {
                state.stats.misses += 1;
                (key, None)
            }
        }
    }

    /// Allocates a new row, marks it cache-owned, and inserts it under
    /// `key` with ref-count 1 (the handle returned here). Evicts
    /// least-recently-used removable entries until the cache is back under
    /// capacity.
    pub fn add_row(
        &self,
        key: u64,
        x: i32,
        r: i32,
        y: i32,
        channels: ChannelSet,
        filename: &str,
    ) -> Option<Row> {
        let (entry_arc, handle) = Row::new_cache_entry(x, y, r, channels);
        let mut state = self.state.lock();
        state.rows.insert(key, entry_arc);
        state.keys_by_filename.entry(filename.to_string()).or_default().push(key);
        self.evict_to_capacity(&mut state);
        let current = state.current_size();
        state.stats.peak_size = state.stats.peak_size.max(current);
        Some(handle)
    }

    /// Sets the byte capacity that eviction targets; does not evict
    /// immediately.
    pub fn set_capacity(&self, bytes: usize) {
        self.state.lock().capacity = bytes;
    }

    /// Total bytes currently resident.
    pub fn current_size(&self) -> usize {
        self.state.lock().current_size()
    }

    /// Destroys every removable entry; pinned entries survive untouched.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        loop {
            let removable_key = state
                .rows
                .iter()
                .find(|(_, entry)| entry.is_removable())
                .map(|(k, _)| *k);
            match removable_key {
                Some(k) => {
                    state.rows.remove(&k);
                    state.stats.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// Drops every removable row whose key was derived from `filename`
    /// (e.g. because the decoder's file changed on disk). Pinned rows
    /// derived from the same filename are left in place. Not present in
    /// the original design; added so a host application can invalidate a
    /// single decoder's rows without clearing the whole cache.
    pub fn invalidate(&self, filename: &str) {
        let mut state = self.state.lock();
        let Some(keys) = state.keys_by_filename.remove(filename) else { return };
        for key in keys {
            if state.rows.peek(&key).is_some_and(CacheEntry::is_removable) {
                state.rows.remove(&key);
                state.stats.evictions += 1;
            }
        }
    }

    /// Unconditionally removes `key`, regardless of its ref-count. Used to
    /// roll back an allocation made by [`add_row`](Self::add_row) when the
    /// node that requested it failed to compute: the caller is the entry's
    /// only holder at that point, so there is no pin-safety concern.
    pub fn remove_key(&self, key: u64) {
        let mut state = self.state.lock();
        state.rows.remove(&key);
        for keys in state.keys_by_filename.values_mut() {
            keys.retain(|k| *k != key);
        }
    }

    /// A snapshot of current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    fn evict_to_capacity(&self, state: &mut State) {
        let mut guard = 0usize;
        let bound = state.rows.len() + 1;
        while state.current_size() > state.capacity && guard < bound {
            guard += 1;
            match state.rows.evict() {
                Some(_) => state.stats.evictions += 1,
                None => break, // emergency contract: nothing removable, stop silently
            }
        }
    }
}

impl State {
    fn current_size(&self) -> usize {
        self.rows.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[test]
    fn miss_then_hit_with_identical_contents() {
        let cache = NodeCache::new(1024 * 1024);
        let (key, miss) = cache.get(7, "f.exr", 0, 64, 0);
        assert!(miss.is_none());

        let row = cache.add_row(key, 0, 64, 0, ChannelSet::rgba(), "f.exr").unwrap();
        row.with_channel_mut(Channel::Red, |buf| buf.fill(0.5));
        drop(row);

        let (_, hit) = cache.get(7, "f.exr", 0, 64, 0);
        let hit = hit.expect("expected a cache hit");
        hit.with_channel(Channel::Red, |buf| assert!(buf.iter().all(|&v| v == 0.5)));
    }

    #[test]
    fn lru_eviction_under_capacity_pressure() {
        // Each row of 256 RGBA floats is 256*4*4 = 4096 bytes; cap for 2 entries.
        let cache = NodeCache::new(2 * 4096);
        let (k1, _) = cache.get(1, "f.exr", 0, 256, 0);
        let row1 = cache.add_row(k1, 0, 256, 0, ChannelSet::rgba(), "f.exr").unwrap();
        drop(row1);

        let (k2, _) = cache.get(2, "f.exr", 0, 256, 0);
        let row2 = cache.add_row(k2, 0, 256, 0, ChannelSet::rgba(), "f.exr").unwrap();
        drop(row2);

        // Touch k1 so k2 becomes least-recently-used.
        let (_, hit1) = cache.get(1, "f.exr", 0, 256, 0);
        drop(hit1);

        let (k3, _) = cache.get(3, "f.exr", 0, 256, 0);
        let row3 = cache.add_row(k3, 0, 256, 0, ChannelSet::rgba(), "f.exr").unwrap();
        drop(row3);

        let (_, hit_k1) = cache.get(1, "f.exr", 0, 256, 0);
        let (_, hit_k2) = cache.get(2, "f.exr", 0, 256, 0);
        let (_, hit_k3) = cache.get(3, "f.exr", 0, 256, 0);
        assert!(hit_k1.is_some());
        assert!(hit_k2.is_none(), "k2 should have been evicted");
        assert!(hit_k3.is_some());
    }

    #[test]
    fn pinned_entry_survives_eviction_pressure() {
        let cache = NodeCache::new(2 * 4096);
        let (k1, _) = cache.get(1, "f.exr", 0, 256, 0);
        let row1 = cache.add_row(k1, 0, 256, 0, ChannelSet::rgba(), "f.exr").unwrap();
        // k1 kept pinned: row1 never dropped.

        let (k2, _) = cache.get(2, "f.exr", 0, 256, 0);
        let row2 = cache.add_row(k2, 0, 256, 0, ChannelSet::rgba(), "f.exr").unwrap();
        drop(row2);

        let (k3, _) = cache.get(3, "f.exr", 0, 256, 0);
        let row3 = cache.add_row(k3, 0, 256, 0, ChannelSet::rgba(), "f.exr").unwrap();
        drop(row3);

        let (_, hit_k1) = cache.get(1, "f.exr", 0, 256, 0);
        let (_, hit_k2) = cache.get(2, "f.exr", 0, 256, 0);
        assert!(hit_k1.is_some(), "pinned k1 must never be evicted");
        assert!(hit_k2.is_none(), "k2 was the only removable candidate");
        drop(row1);
    }

    #[test]
    fn clear_destroys_only_removable_entries() {
        let cache = NodeCache::new(1024 * 1024);
        let (k1, _) = cache.get(1, "f.exr", 0, 16, 0);
        let row1 = cache.add_row(k1, 0, 16, 0, ChannelSet::rgba(), "f.exr").unwrap();
        let (k2, _) = cache.get(2, "f.exr", 0, 16, 0);
        let row2 = cache.add_row(k2, 0, 16, 0, ChannelSet::rgba(), "f.exr").unwrap();
        drop(row2);

        cache.clear();

        let (_, hit_k1) = cache.get(1, "f.exr", 0, 16, 0);
        let (_, hit_k2) = cache.get(2, "f.exr", 0, 16, 0);
        assert!(hit_k1.is_some(), "pinned entry must survive clear()");
        assert!(hit_k2.is_none(), "removable entry must be destroyed by clear()");
        drop(row1);
    }
}
