//! Fixed-length bit array with multi-bit field access.
//!
//! The backing words are a `Cow` so the same type serves both as a builder
//! (owned, mutable) and as a zero-copy view into a mapped index file.

use std::borrow::Cow;
use std::io::{self, Write};

use super::archive::{ArchiveError, Deserializer, Persist, Serializer};

/// Number of 64-bit words needed to hold `len` bits
#[inline]
pub fn words_for(len: u32) -> usize {
    (len as usize).div_ceil(64)
}

/// Mask with the low `width` bits set (`width <= 64`)
#[inline]
pub fn low_mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

/// Number of bits needed to store `x` (0 for 0)
#[inline]
pub fn bit_width(x: u64) -> u32 {
    64 - x.leading_zeros()
}

/// Ceiling of log2, with `clog2(0) == clog2(1) == 0`
#[inline]
pub fn clog2(x: u64) -> u32 {
    if x > 1 { bit_width(x - 1) } else { 0 }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitSet<'a> {
    len: u32,
    words: Cow<'a, [u64]>,
}

impl BitSet<'static> {
    /// Create a zeroed bit set of `len` bits
    pub fn new(len: u32) -> Self {
        Self {
            len,
            words: Cow::Owned(vec![0u64; words_for(len)]),
        }
    }

    pub fn from_bits(bits: impl IntoIterator<Item = bool>) -> Self {
        let mut words = Vec::new();
        let mut len = 0u32;
        for bit in bits {
            if len % 64 == 0 {
                words.push(0u64);
            }
            if bit {
                words[(len / 64) as usize] |= 1u64 << (len % 64);
            }
            len += 1;
        }
        Self {
            len,
            words: Cow::Owned(words),
        }
    }
}

impl<'a> BitSet<'a> {
    /// Wrap an existing word slice. Returns `None` if the slice has the wrong size.
    pub fn from_words(len: u32, words: Cow<'a, [u64]>) -> Option<Self> {
        (words.len() == words_for(len)).then_some(Self { len, words })
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub fn get(&self, i: u32) -> bool {
        debug_assert!(i < self.len);
        (self.words[(i / 64) as usize] >> (i % 64)) & 1 == 1
    }

    #[inline]
    pub fn set(&mut self, i: u32) {
        debug_assert!(i < self.len);
        self.words.to_mut()[(i / 64) as usize] |= 1u64 << (i % 64);
    }

    /// Read `width` bits starting at bit `pos`, low bit first.
    #[inline]
    pub fn get_bits(&self, pos: u64, width: u32) -> u64 {
        if width == 0 {
            return 0;
        }
        debug_assert!(pos + width as u64 <= self.len as u64);
        let word = (pos / 64) as usize;
        let shift = (pos % 64) as u32;
        let mut value = self.words[word] >> shift;
        if shift + width > 64 {
            value |= self.words[word + 1] << (64 - shift);
        }
        value & low_mask(width)
    }

    /// OR `value` into the `width` bits starting at `pos`. The field is
    /// expected to be zero beforehand.
    #[inline]
    pub fn set_bits(&mut self, pos: u64, width: u32, value: u64) {
        if width == 0 {
            return;
        }
        debug_assert!(pos + width as u64 <= self.len as u64);
        let value = value & low_mask(width);
        let word = (pos / 64) as usize;
        let shift = (pos % 64) as u32;
        let words = self.words.to_mut();
        words[word] |= value << shift;
        if shift + width > 64 {
            words[word + 1] |= value >> (64 - shift);
        }
    }

    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Convert to an owned bit set with no borrowed storage
    pub fn into_owned(self) -> BitSet<'static> {
        BitSet {
            len: self.len,
            words: Cow::Owned(self.words.into_owned()),
        }
    }
}

impl<'a> Persist<'a> for BitSet<'a> {
    fn persist<W: Write>(&self, out: &mut Serializer<W>) -> io::Result<()> {
        out.scalar(self.len)?;
        out.array(self.words())
    }

    fn restore(input: &mut Deserializer<'a>) -> Result<Self, ArchiveError> {
        let len: u32 = input.scalar()?;
        let words = input.array::<u64>()?;
        Self::from_words(len, Cow::Borrowed(words)).ok_or(ArchiveError::Corrupt("bit set length"))
    }
}

/// Position of the `k`-th (0-based) set bit of `word`. `k` must be below
/// `word.count_ones()`.
#[inline]
pub fn select_in_word(mut word: u64, mut k: u32) -> u32 {
    debug_assert!(k < word.count_ones());
    let mut base = 0;
    // narrow down 16 bits at a time, then finish bit by bit
    loop {
        let ones = (word & 0xffff).count_ones();
        if k < ones {
            break;
        }
        k -= ones;
        word >>= 16;
        base += 16;
    }
    for _ in 0..k {
        word &= word - 1;
    }
    base + word.trailing_zeros()
}
