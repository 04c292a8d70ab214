//! Fixed-capacity bitset of received chunk indices.

use serde::{Serialize, Serializer};

const WORD_BITS: u32 = 64;

/// Set of chunk indices in `[0, capacity)`, one bit per chunk.
///
/// Membership and insertion are O(1); iteration walks `capacity / 64` words.
/// Serializes as an ascending list of indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSet {
    words: Vec<u64>,
    capacity: u32,
    len: u32,
}

impl ChunkSet {
    /// Creates an empty set able to hold indices `0..capacity`.
    pub fn new(capacity: u32) -> Self {
        let words = capacity.div_ceil(WORD_BITS) as usize;
        Self {
            words: vec![0; words],
            capacity,
            len: 0,
        }
    }

    /// Adds `index`. Returns `true` if it was not already present.
    ///
    /// Out-of-range indices are ignored and return `false`; callers that
    /// care validate the range first.
    pub fn insert(&mut self, index: u32) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (word, mask) = Self::locate(index);
        let slot = &mut self.words[word];
        if *slot & mask != 0 {
            return false;
        }
        *slot |= mask;
        self.len += 1;
        true
    }

    pub fn contains(&self, index: u32) -> bool {
        if index >= self.capacity {
            return false;
        }
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    /// Number of indices present.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Exclusive upper bound on indices.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns `true` when every index in `[0, capacity)` is present.
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Present indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(i, &word)| BitIter {
                word,
                base: i as u32 * WORD_BITS,
            })
    }

    /// Absent indices in ascending order.
    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        let capacity = self.capacity;
        self.words
            .iter()
            .enumerate()
            .flat_map(|(i, &word)| BitIter {
                word: !word,
                base: i as u32 * WORD_BITS,
            })
            .take_while(move |&index| index < capacity)
    }

    fn locate(index: u32) -> (usize, u64) {
        ((index / WORD_BITS) as usize, 1u64 << (index % WORD_BITS))
    }
}

impl Serialize for ChunkSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Yields the set bit positions of one word, offset by `base`.
struct BitIter {
    word: u64,
    base: u32,
}

impl Iterator for BitIter {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.word == 0 {
            return None;
        }
        let bit = self.word.trailing_zeros();
        self.word &= self.word - 1;
        Some(self.base + bit)
    }
}
