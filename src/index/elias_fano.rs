//! Elias-Fano coding of a non-decreasing integer sequence.
//!
//! Each value is split into `l` low bits, stored verbatim, and a high part
//! stored in unary: value `j` sets bit `(x_j >> l) + j` of the high bit
//! vector. The high vector is RRR compressed so it answers `select0` and
//! `select1` directly.

use std::io::{self, Write};

use super::BuildError;
use super::archive::{ArchiveError, Deserializer, Persist, Serializer};
use super::bitset::{BitSet, bit_width, low_mask};
use super::rrr::Rrr;

/// Largest number of values a sequence may hold
pub const MAX_LEN: u32 = (1 << 30) - 2;

fn low_bits_for(n: u32, bound: u32) -> u32 {
    if n > 0 && n <= bound {
        bit_width((bound / n) as u64) - 1
    } else {
        0
    }
}

fn high_len(n: u32, bound: u32, low_bits: u32) -> u64 {
    (bound >> low_bits) as u64 + n as u64 + 1
}

/// Collects values in order, then compresses them into an [`EliasFano`]
pub struct EliasFanoBuilder {
    expected: u32,
    bound: u32,
    low_bits: u32,
    lows: BitSet<'static>,
    highs: BitSet<'static>,
    pushed: u32,
    last: u32,
}

impl EliasFanoBuilder {
    /// Prepare for `n` values, each at most `bound`
    pub fn new(n: u32, bound: u32) -> Result<Self, BuildError> {
        if n > MAX_LEN {
            return Err(BuildError::SequenceTooLong(n));
        }
        let bound = if n == 0 { 0 } else { bound };
        let low_bits = low_bits_for(n, bound);
        let high_len = high_len(n, bound, low_bits);
        Ok(Self {
            expected: n,
            bound,
            low_bits,
            lows: BitSet::new(n * low_bits),
            highs: BitSet::new(high_len as u32),
            pushed: 0,
            last: 0,
        })
    }

    pub fn push(&mut self, value: u32) -> Result<(), BuildError> {
        if self.pushed == self.expected {
            return Err(BuildError::SequenceFull(self.expected));
        }
        if value > self.bound {
            return Err(BuildError::OutOfBound {
                value,
                bound: self.bound,
            });
        }
        if value < self.last {
            return Err(BuildError::Unsorted {
                value,
                last: self.last,
            });
        }
        let l = self.low_bits;
        self.lows
            .set_bits(self.pushed as u64 * l as u64, l, value as u64);
        self.highs.set((value >> l) + self.pushed);
        self.pushed += 1;
        self.last = value;
        Ok(())
    }

    pub fn build(self, sample_len: u32) -> Result<EliasFano<'static>, BuildError> {
        if self.pushed != self.expected {
            return Err(BuildError::SequenceIncomplete {
                pushed: self.pushed,
                expected: self.expected,
            });
        }
        Ok(EliasFano {
            len: self.expected,
            bound: self.bound,
            low_bits: self.low_bits,
            lows: self.lows,
            highs: Rrr::build(&self.highs, 0, sample_len),
        })
    }
}

#[derive(Clone, Debug)]
pub struct EliasFano<'a> {
    len: u32,
    bound: u32,
    low_bits: u32,
    lows: BitSet<'a>,
    highs: Rrr<'a>,
}

impl<'a> EliasFano<'a> {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }

    pub fn size_in_bytes(&self) -> usize {
        self.lows.words().len() * 8 + self.highs.size_in_bytes()
    }

    #[inline]
    fn low(&self, idx: u32) -> u32 {
        self.lows
            .get_bits(idx as u64 * self.low_bits as u64, self.low_bits) as u32
    }

    /// The `idx`-th value
    pub fn get(&self, idx: u32) -> Option<u32> {
        if idx >= self.len {
            return None;
        }
        let high = (self.highs.select1(idx)? - idx) as u64;
        Some(((high << self.low_bits) | self.low(idx) as u64) as u32)
    }

    /// Number of values strictly below `x`
    pub fn lower_bound(&self, x: u32) -> u32 {
        if x > self.bound {
            return self.len;
        }
        let high = x >> self.low_bits;
        let low = x & low_mask(self.low_bits) as u32;
        // the high-th zero follows every value whose high part is <= high
        let Some(mut i) = self.highs.select0(high) else {
            return self.len;
        };
        let mut r = i - high;
        while i > 0 && self.highs.get(i - 1) && self.low(r - 1) >= low {
            i -= 1;
            r -= 1;
        }
        r
    }

    /// Number of values less than or equal to `x`
    pub fn rank(&self, x: u32) -> u32 {
        if x >= self.bound {
            self.len
        } else {
            self.lower_bound(x + 1)
        }
    }

    pub fn contains(&self, x: u32) -> bool {
        let r = self.lower_bound(x);
        r < self.len && self.get(r) == Some(x)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter_map(|idx| self.get(idx))
    }
}

impl<'a> Persist<'a> for EliasFano<'a> {
    fn persist<W: Write>(&self, out: &mut Serializer<W>) -> io::Result<()> {
        out.scalar(self.len)?;
        out.scalar(self.bound)?;
        out.scalar(self.low_bits)?;
        self.lows.persist(out)?;
        self.highs.persist(out)
    }

    fn restore(input: &mut Deserializer<'a>) -> Result<Self, ArchiveError> {
        let len: u32 = input.scalar()?;
        let bound: u32 = input.scalar()?;
        let low_bits: u32 = input.scalar()?;
        let lows = BitSet::restore(input)?;
        let highs = Rrr::restore(input)?;
        if len > MAX_LEN
            || low_bits != low_bits_for(len, bound)
            || lows.len() as u64 != len as u64 * low_bits as u64
            || highs.len() as u64 != high_len(len, bound, low_bits)
            || highs.count_ones() != len
        {
            return Err(ArchiveError::Corrupt("elias-fano layout"));
        }
        Ok(Self {
            len,
            bound,
            low_bits,
            lows,
            highs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(values: &[u32], bound: u32) -> EliasFano<'static> {
        let mut builder = EliasFanoBuilder::new(values.len() as u32, bound).unwrap();
        for &v in values {
            builder.push(v).unwrap();
        }
        builder.build(4).unwrap()
    }

    #[test]
    fn test_get_recovers_values() {
        let values = [0, 3, 3, 7, 18, 19, 64, 100, 255, 1000];
        let ef = build(&values, 1000);
        assert_eq!(ef.iter().collect::<Vec<_>>(), values);
        assert_eq!(ef.get(values.len() as u32), None);
    }

    #[test]
    fn test_rank_and_lower_bound_match_naive_counts() {
        let values = [2, 2, 5, 9, 9, 9, 31, 40, 41, 63];
        let ef = build(&values, 70);
        for x in 0..=75 {
            let below = values.iter().filter(|&&v| v < x).count() as u32;
            let at_most = values.iter().filter(|&&v| v <= x).count() as u32;
            assert_eq!(ef.lower_bound(x), below, "lower_bound({x})");
            assert_eq!(ef.rank(x), at_most, "rank({x})");
            assert_eq!(ef.contains(x), values.contains(&x), "contains({x})");
        }
    }

    #[test]
    fn test_sparse_sampled_positions() {
        let values: Vec<u32> = (0..500).map(|i| i * 32).collect();
        let ef = build(&values, 499 * 32 + 7);
        for (idx, &v) in values.iter().enumerate() {
            assert!(ef.contains(v));
            assert!(!ef.contains(v + 1));
            assert_eq!(ef.lower_bound(v), idx as u32);
        }
    }

    #[test]
    fn test_empty_sequence() {
        let ef = build(&[], u32::MAX);
        assert_eq!(ef.len(), 0);
        assert_eq!(ef.rank(10), 0);
        assert_eq!(ef.lower_bound(0), 0);
        assert!(!ef.contains(0));
    }

    #[test]
    fn test_builder_rejects_bad_input() {
        let mut builder = EliasFanoBuilder::new(2, 10).unwrap();
        builder.push(5).unwrap();
        assert!(matches!(builder.push(4), Err(BuildError::Unsorted { .. })));
        assert!(matches!(builder.push(11), Err(BuildError::OutOfBound { .. })));
        assert!(matches!(
            builder.build(4),
            Err(BuildError::SequenceIncomplete { pushed: 1, expected: 2 })
        ));
    }
}
