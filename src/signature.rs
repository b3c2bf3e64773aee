//! Bit signatures encoding which component types are present.
//!
//! Bit *i* of a signature is set if and only if the component type with
//! ordinal *i* is attached. Archetype identity and query predicates are both
//! expressed in this form, which reduces layout matching to a handful of word
//! sized AND/OR operations regardless of how many component types exist.
//!
//! Two representations are provided: [FixedSignature] has a width chosen at
//! compile time and is `Copy`, while [Signature] grows on demand as new
//! component ordinals are registered. Growable signatures of different
//! lengths compare as if the shorter one were zero-extended.

use smallvec::SmallVec;
use std::fmt;

const BITS_PER_WORD: usize = 64;

// Signatures cover the common case of < 256 registered component types
// without spilling to the heap.
const INLINE_WORDS: usize = 4;

#[inline]
fn word_of(bit: usize) -> usize {
    bit / BITS_PER_WORD
}

#[inline]
fn mask_of(bit: usize) -> u64 {
    1u64 << (bit % BITS_PER_WORD)
}

#[inline]
fn get_word(words: &[u64], index: usize) -> u64 {
    words.get(index).copied().unwrap_or(0)
}

fn contains_all(words: &[u64], other: &[u64]) -> bool {
    other
        .iter()
        .enumerate()
        .all(|(i, &w)| get_word(words, i) & w == w)
}

fn intersects(words: &[u64], other: &[u64]) -> bool {
    words
        .iter()
        .zip(other.iter())
        .any(|(&a, &b)| a & b != 0)
}

/// Iterator over the indices of set bits, in ascending order.
pub struct Ones<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl<'a> Ones<'a> {
    fn new(words: &'a [u64]) -> Self {
        Self {
            words,
            word_idx: 0,
            current: words.first().copied().unwrap_or(0),
        }
    }
}

impl<'a> Iterator for Ones<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * BITS_PER_WORD + bit);
            }

            self.word_idx += 1;
            if self.word_idx >= self.words.len() {
                return None;
            }
            self.current = self.words[self.word_idx];
        }
    }
}

/// Iterator over the indices of set bits, in descending order.
pub struct OnesRev<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl<'a> OnesRev<'a> {
    fn new(words: &'a [u64]) -> Self {
        let word_idx = words.len();
        Self {
            words,
            word_idx,
            current: 0,
        }
    }
}

impl<'a> Iterator for OnesRev<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = BITS_PER_WORD - 1 - self.current.leading_zeros() as usize;
                self.current &= !(1u64 << bit);
                return Some(self.word_idx * BITS_PER_WORD + bit);
            }

            if self.word_idx == 0 {
                return None;
            }
            self.word_idx -= 1;
            self.current = self.words[self.word_idx];
        }
    }
}

/// Iterator over the indices of clear bits, in ascending order, bounded by
/// the signature's bit width.
pub struct Zeros<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
    limit: usize,
}

impl<'a> Zeros<'a> {
    fn new(words: &'a [u64], limit: usize) -> Self {
        Self {
            words,
            word_idx: 0,
            current: !words.first().copied().unwrap_or(0),
            limit,
        }
    }
}

impl<'a> Iterator for Zeros<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                let index = self.word_idx * BITS_PER_WORD + bit;
                if index >= self.limit {
                    return None;
                }
                return Some(index);
            }

            self.word_idx += 1;
            if self.word_idx >= self.words.len() {
                return None;
            }
            self.current = !self.words[self.word_idx];
        }
    }
}

/// A bit signature with a width fixed at compile time.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FixedSignature<const WORDS: usize> {
    words: [u64; WORDS],
}

impl<const WORDS: usize> Default for FixedSignature<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WORDS: usize> FixedSignature<WORDS> {
    /// The number of bits the signature can hold.
    pub const BITS: usize = WORDS * BITS_PER_WORD;

    /// Constructs an empty signature.
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Sets the bit at `index`.
    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < Self::BITS, "bit index {} out of range", index);
        self.words[word_of(index)] |= mask_of(index);
    }

    /// Clears the bit at `index`.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        assert!(index < Self::BITS, "bit index {} out of range", index);
        self.words[word_of(index)] &= !mask_of(index);
    }

    /// Returns `true` if the bit at `index` is set.
    #[inline]
    pub fn test(&self, index: usize) -> bool {
        index < Self::BITS && self.words[word_of(index)] & mask_of(index) != 0
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        self.words = [0; WORDS];
    }

    /// Returns the number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    pub fn contains_all(&self, other: &Self) -> bool {
        contains_all(&self.words, &other.words)
    }

    /// Returns `true` if `self` and `other` have any set bit in common.
    pub fn intersects(&self, other: &Self) -> bool {
        intersects(&self.words, &other.words)
    }

    /// Returns `true` if `self` and `other` have no set bit in common.
    pub fn is_disjoint(&self, other: &Self) -> bool {
        !self.intersects(other)
    }

    /// Iterates over set bits in ascending order.
    pub fn ones(&self) -> Ones {
        Ones::new(&self.words)
    }

    /// Iterates over set bits in descending order.
    pub fn ones_rev(&self) -> OnesRev {
        OnesRev::new(&self.words)
    }

    /// Iterates over clear bits in ascending order.
    pub fn zeros(&self) -> Zeros {
        Zeros::new(&self.words, Self::BITS)
    }
}

impl<const WORDS: usize> fmt::Debug for FixedSignature<WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ones()).finish()
    }
}

/// A growable bit signature.
///
/// The width expands automatically when a bit beyond the current length is
/// set. Comparisons treat missing high words as zero, so signatures built at
/// different registry sizes stay comparable.
#[derive(Clone, Default)]
pub struct Signature {
    words: SmallVec<[u64; INLINE_WORDS]>,
}

impl Signature {
    /// Constructs an empty signature.
    pub fn new() -> Self {
        Self {
            words: SmallVec::new(),
        }
    }

    /// Constructs a signature with the given bits set.
    pub fn from_bits(bits: impl IntoIterator<Item = usize>) -> Self {
        let mut signature = Self::new();
        for bit in bits {
            signature.set(bit);
        }
        signature
    }

    /// The current bit width. Bits at or beyond this index read as clear.
    pub fn len(&self) -> usize {
        self.words.len() * BITS_PER_WORD
    }

    /// Sets the bit at `index`, growing the signature if needed.
    pub fn set(&mut self, index: usize) {
        let word = word_of(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= mask_of(index);
    }

    /// Clears the bit at `index`.
    pub fn clear(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(word_of(index)) {
            *word &= !mask_of(index);
        }
    }

    /// Returns `true` if the bit at `index` is set.
    #[inline]
    pub fn test(&self, index: usize) -> bool {
        get_word(&self.words, word_of(index)) & mask_of(index) != 0
    }

    /// Clears every bit without shrinking the allocation.
    pub fn clear_all(&mut self) {
        for word in self.words.iter_mut() {
            *word = 0;
        }
    }

    /// Returns the number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    pub fn contains_all(&self, other: &Self) -> bool {
        contains_all(&self.words, &other.words)
    }

    /// Returns `true` if `self` and `other` have any set bit in common.
    pub fn intersects(&self, other: &Self) -> bool {
        intersects(&self.words, &other.words)
    }

    /// Returns `true` if `self` and `other` have no set bit in common.
    pub fn is_disjoint(&self, other: &Self) -> bool {
        !self.intersects(other)
    }

    /// Sets every bit which is set in `other`.
    pub fn union_with(&mut self, other: &Self) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (word, &w) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= w;
        }
    }

    /// Clears every bit which is clear in `other`.
    pub fn intersect_with(&mut self, other: &Self) {
        for (i, word) in self.words.iter_mut().enumerate() {
            *word &= get_word(&other.words, i);
        }
    }

    /// Clears every bit which is set in `other`.
    pub fn difference_with(&mut self, other: &Self) {
        for (word, &w) in self.words.iter_mut().zip(other.words.iter()) {
            *word &= !w;
        }
    }

    /// Iterates over set bits in ascending order.
    pub fn ones(&self) -> Ones {
        Ones::new(&self.words)
    }

    /// Iterates over set bits in descending order.
    pub fn ones_rev(&self) -> OnesRev {
        OnesRev::new(&self.words)
    }

    /// Iterates over clear bits in ascending order, up to the signature's
    /// current bit width.
    pub fn zeros(&self) -> Zeros {
        Zeros::new(&self.words, self.len())
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        let max = self.words.len().max(other.words.len());
        (0..max).all(|i| get_word(&self.words, i) == get_word(&other.words, i))
    }
}

impl Eq for Signature {}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ones()).finish()
    }
}
