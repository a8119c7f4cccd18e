//! Content-addressed fingerprinting for node-graph outputs.
//!
//! A [`Hash`] accumulates 64-bit words into a byte buffer and folds them
//! with a fixed CRC-32 checksum (widened to 64 bits) on [`Hash::compute`].
//! [`fingerprint_node`] wraps the accumulation order a single node's
//! fingerprint must follow: its own parameter words, its class name, then
//! its already-computed parent fingerprints in input order. Recursing that
//! over a node graph (tree-hashing, with a visited set to avoid recomputing
//! shared ancestors) is the caller's responsibility — this crate has no
//! notion of a graph, only of the fold.

/// Accumulates words for a single fingerprint computation.
///
/// `append*` calls push words into a pending buffer; [`compute`](Hash::compute)
/// folds the buffer with a 32-bit CRC and clears it, leaving [`value`](Hash::value)
/// holding the result.
#[derive(Debug, Default, Clone)]
pub struct Hash {
    buffer: Vec<u8>,
    value: u64,
}

impl Hash {
    /// Creates an empty hash with no pending words and a zero value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single 64-bit word to the pending buffer.
    pub fn append(&mut self, word: u64) {
        self.buffer.extend_from_slice(&word.to_le_bytes());
    }

    /// Appends each character of `text` as its own word.
    pub fn append_string(&mut self, text: &str) {
        for ch in text.chars() {
            self.append(ch as u64);
        }
    }

    /// Appends another hash's already-computed value as a word.
    pub fn append_hash(&mut self, other: &Hash) {
        self.append(other.value());
    }

    /// Folds the pending buffer with a 32-bit CRC, widens it to 64 bits,
    /// stores it as the current value, and clears the buffer.
    pub fn compute(&mut self) -> u64 {
        let mut crc = crc32fast::Hasher::new();
        crc.update(&self.buffer);
        self.value = crc.finalize() as u64;
        self.buffer.clear();
        self.value
    }

    /// The most recently computed value (zero if `compute` was never called).
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Clears the pending buffer and resets the value to zero.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.value = 0;
    }
}

/// Computes a single node's fingerprint.
///
/// Accumulation order: `params` words, then `class_name`'s characters, then
/// `parent_fingerprints` in declared input order. This is the per-node fold
/// the tree-hash procedure applies at every not-yet-visited node; the caller
/// owns the depth-first traversal and the visited-by-name set over the graph.
pub fn fingerprint_node(params: &[u64], class_name: &str, parent_fingerprints: &[u64]) -> u64 {
    let mut hash = Hash::new();
    for &word in params {
        hash.append(word);
    }
    hash.append_string(class_name);
    for &parent in parent_fingerprints {
        hash.append(parent);
    }
    hash.compute()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = fingerprint_node(&[1, 2, 3], "Blur", &[42]);
        let b = fingerprint_node(&[1, 2, 3], "Blur", &[42]);
        assert_eq!(a, b);
    }

    #[test]
    fn order_sensitive_on_inputs() {
        let forward = fingerprint_node(&[1], "Merge", &[10, 20]);
        let swapped = fingerprint_node(&[1], "Merge", &[20, 10]);
        assert_ne!(forward, swapped);
    }

    #[test]
    fn order_sensitive_on_params() {
        let a = fingerprint_node(&[1, 2], "Grade", &[]);
        let b = fingerprint_node(&[2, 1], "Grade", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn class_name_distinguishes_otherwise_identical_nodes() {
        let a = fingerprint_node(&[1, 2, 3], "Blur", &[]);
        let b = fingerprint_node(&[1, 2, 3], "Sharpen", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn recursion_cascades_to_descendants() {
        // A -> B -> C, modeled by hand: B's fingerprint folds in A's, C's folds in B's.
        let a1 = fingerprint_node(&[1], "Read", &[]);
        let b1 = fingerprint_node(&[10], "Blur", &[a1]);
        let c1 = fingerprint_node(&[100], "Write", &[b1]);

        // Flip A's parameter; B and C must both change.
        let a2 = fingerprint_node(&[2], "Read", &[]);
        let b2 = fingerprint_node(&[10], "Blur", &[a2]);
        let c2 = fingerprint_node(&[100], "Write", &[b2]);

        assert_ne!(a1, a2);
        assert_ne!(b1, b2);
        assert_ne!(c1, c2);

        // Flip back; fingerprints are restored exactly.
        let a3 = fingerprint_node(&[1], "Read", &[]);
        let b3 = fingerprint_node(&[10], "Blur", &[a3]);
        let c3 = fingerprint_node(&[100], "Write", &[b3]);
        assert_eq!(a1, a3);
        assert_eq!(b1, b3);
        assert_eq!(c1, c3);
    }

    #[test]
    fn append_hash_matches_manual_value_append() {
        let mut inner = Hash::new();
        inner.append(7);
        inner.compute();

        let mut via_append_hash = Hash::new();
        via_append_hash.append_hash(&inner);
        let a = via_append_hash.compute();

        let mut via_manual = Hash::new();
        via_manual.append(inner.value());
        let b = via_manual.compute();

        assert_eq!(a, b);
    }

    #[test]
    fn reset_clears_pending_and_value() {
        let mut h = Hash::new();
        h.append(99);
        h.compute();
        assert_ne!(h.value(), 0);
        h.reset();
        assert_eq!(h.value(), 0);
        h.append(0);
        assert_eq!(h.compute(), h.value());
    }
}
