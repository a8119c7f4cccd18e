//! Generic ordered key -> entry container with pin-aware eviction.
//!
//! Recency order is tracked as a `VecDeque` of keys (front = least recently
//! used, back = most recently used), the same access-order idiom as
//! `vfx-compute`'s region cache. `NodeCache` and `ViewerCache` both build on
//! this rather than reimplementing eviction skip logic.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Anything an [`LruContainer`] can hold: it must be able to report whether
/// it is safe to evict (no outstanding references) and how large it is.
pub trait CacheEntry {
    /// `true` when nothing outside the cache still refers to this entry.
    fn is_removable(&self) -> bool;

    /// Size in bytes, for capacity accounting.
    fn size_bytes(&self) -> usize;
}

/// A key/entry map with an intrinsic least-to-most-recently-used order.
pub struct LruContainer<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> Default for LruContainer<K, V> {
    fn default() -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new() }
    }
}

impl<K, V> LruContainer<K, V>
where
    K: Eq + Hash + Clone,
{
    /// An empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the container holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts `value` under `key` as the most-recently-used entry,
    /// replacing and returning any prior value under the same key.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let old = self.entries.insert(key.clone(), value);
        self.forget_order(&key);
        self.order.push_back(key);
        old
    }

    /// Moves `key` to the most-recently-used position. Returns `false` if
    /// absent.
    pub fn touch(&mut self, key: &K) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        self.forget_order(key);
        self.order.push_back(key.clone());
        true
    }

    /// Returns the entry for `key`, touching it on success.
    pub fn lookup(&mut self, key: &K) -> Option<&V> {
        self.touch(key);
        self.entries.get(key)
    }

    /// Returns a mutable reference to the entry for `key`, touching it on
    /// success.
    pub fn lookup_mut(&mut self, key: &K) -> Option<&mut V> {
        self.touch(key);
        self.entries.get_mut(key)
    }

    /// Returns the entry for `key` without affecting recency order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Removes `key` unconditionally, regardless of removability. Used by
    /// callers that already know an entry must go (e.g. a corrupt-on-load
    /// entry), not by ordinary eviction.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.forget_order(key);
        self.entries.remove(key)
    }

    /// Total size in bytes of all held entries.
    pub fn size_bytes(&self) -> usize
    where
        V: CacheEntry,
    {
        self.entries.values().map(CacheEntry::size_bytes).sum()
    }

    /// Iterates entries from least- to most-recently-used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order.iter().filter_map(move |k| self.entries.get(k).map(|v| (k, v)))
    }

    /// Evicts and returns one removable entry, preferring the
    /// least-recently-used. Scans at most `len()` entries. If every entry is
    /// currently pinned (`is_removable() == false`), nothing is removed and
    /// `None` is returned — the emergency contract: the size budget is
    /// temporarily exceeded rather than risking a use-after-free.
    pub fn evict(&mut self) -> Option<(K, V)>
    where
        V: CacheEntry,
    {
        let victim = self
            .order
            .iter()
            .find(|k| self.entries.get(*k).is_some_and(CacheEntry::is_removable))
            .cloned()?;
        self.forget_order(&victim);
        let value = self.entries.remove(&victim)?;
        Some((victim, value))
    }

    fn forget_order(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Dummy {
        size: usize,
        pinned: bool,
    }

    impl CacheEntry for Dummy {
        fn is_removable(&self) -> bool {
            !self.pinned
        }
        fn size_bytes(&self) -> usize {
            self.size
        }
    }

    fn entry(size: usize) -> Dummy {
        Dummy { size, pinned: false }
    }

    #[test]
    fn lru_order_evicts_least_recently_used() {
        let mut lru: LruContainer<u32, Dummy> = LruContainer::new();
        lru.insert(1, entry(1024));
        lru.insert(2, entry(1024));
        lru.lookup(&1); // touch k1 so k2 becomes LRU
        lru.insert(3, entry(1024));

        let (evicted_key, _) = lru.evict().unwrap();
        assert_eq!(evicted_key, 2);
        assert!(lru.contains_key(&1));
        assert!(lru.contains_key(&3));
    }

    #[test]
    fn pinned_entry_is_skipped() {
        let mut lru: LruContainer<u32, Dummy> = LruContainer::new();
        lru.insert(1, Dummy { size: 1024, pinned: true });
        lru.insert(2, entry(1024));
        lru.insert(3, entry(1024));

        let (evicted_key, _) = lru.evict().unwrap();
        assert_eq!(evicted_key, 2);
        assert!(lru.contains_key(&1), "pinned entry must survive eviction");
    }

    #[test]
    fn all_pinned_returns_none_without_removing_anything() {
        let mut lru: LruContainer<u32, Dummy> = LruContainer::new();
        lru.insert(1, Dummy { size: 1, pinned: true });
        lru.insert(2, Dummy { size: 1, pinned: true });

        assert!(lru.evict().is_none());
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn reinserting_existing_key_replaces_and_touches() {
        let mut lru: LruContainer<u32, Dummy> = LruContainer::new();
        lru.insert(1, entry(10));
        lru.insert(2, entry(10));
        lru.insert(1, entry(20)); // replace + touch -> 2 becomes LRU

        let order: Vec<_> = lru.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![2, 1]);
        assert_eq!(lru.peek(&1).unwrap().size, 20);
    }

    #[test]
    fn iteration_is_least_to_most_recently_used() {
        let mut lru: LruContainer<u32, Dummy> = LruContainer::new();
        lru.insert(1, entry(1));
        lru.insert(2, entry(1));
        lru.insert(3, entry(1));
        lru.touch(&1);
        let order: Vec<_> = lru.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }
}
