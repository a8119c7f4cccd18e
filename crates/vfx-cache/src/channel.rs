//! Channel identity and channel sets.
//!
//! Mirrors the original engine's bitmask channel set, but as a plain `u32`
//! mask with a real [`Iterator`] impl instead of a hand-rolled C++ iterator
//! class.

/// A single image channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Red.
    Red = 0,
    /// Green.
    Green = 1,
    /// Blue.
    Blue = 2,
    /// Alpha.
    Alpha = 3,
    /// Depth / Z.
    Z = 4,
}

/// Total number of distinct channels this workspace models.
pub const MAX_CHANNELS: usize = 5;

const ALL_CHANNELS: [Channel; MAX_CHANNELS] =
    [Channel::Red, Channel::Green, Channel::Blue, Channel::Alpha, Channel::Z];

/// A bitmask of [`Channel`]s, iterable in channel-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ChannelSet(u32);

impl ChannelSet {
    /// The empty set.
    pub const EMPTY: ChannelSet = ChannelSet(0);

    /// The set containing Red, Green, Blue, and Alpha.
    pub fn rgba() -> Self {
        let mut set = Self::EMPTY;
        set.insert(Channel::Red);
        set.insert(Channel::Green);
        set.insert(Channel::Blue);
        set.insert(Channel::Alpha);
        set
    }

    /// Builds a set from an iterator of channels.
    pub fn from_iter(channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut set = Self::EMPTY;
        for ch in channels {
            set.insert(ch);
        }
        set
    }

    /// Adds `ch` to the set.
    pub fn insert(&mut self, ch: Channel) {
        self.0 |= 1 << (ch as u32);
    }

    /// Removes `ch` from the set.
    pub fn remove(&mut self, ch: Channel) {
        self.0 &= !(1 << (ch as u32));
    }

    /// Whether `ch` is a member of the set.
    pub fn contains(&self, ch: Channel) -> bool {
        self.0 & (1 << (ch as u32)) != 0
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of member channels.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Union of two sets.
    pub fn union(&self, other: &ChannelSet) -> ChannelSet {
        ChannelSet(self.0 | other.0)
    }

    /// Iterates member channels in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        ALL_CHANNELS.iter().copied().filter(move |ch| self.contains(*ch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_contains_four_channels() {
        let set = ChannelSet::rgba();
        assert_eq!(set.len(), 4);
        assert!(set.contains(Channel::Red));
        assert!(set.contains(Channel::Alpha));
        assert!(!set.contains(Channel::Z));
    }

    #[test]
    fn iteration_is_ascending_by_index() {
        let set = ChannelSet::from_iter([Channel::Alpha, Channel::Red, Channel::Z]);
        let order: Vec<_> = set.iter().collect();
        assert_eq!(order, vec![Channel::Red, Channel::Alpha, Channel::Z]);
    }

    #[test]
    fn remove_and_union() {
        let mut set = ChannelSet::rgba();
        set.remove(Channel::Blue);
        assert!(!set.contains(Channel::Blue));
        let merged = set.union(&ChannelSet::from_iter([Channel::Z]));
        assert!(merged.contains(Channel::Z));
        assert!(merged.contains(Channel::Red));
    }
}
