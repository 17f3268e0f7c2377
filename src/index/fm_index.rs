//! FM-index: backward search and position recovery over a BWT.
//!
//! Rows are suffix ranks of the text without its sentinel. The sentinel row
//! is implicit: `initial` is where it would sit in the BWT, and every BWT
//! access at a row `pos` is shifted by `pos < initial`.
//!
//! Text offsets are kept for every suffix whose offset is a multiple of the
//! sample rate. The ranks of those suffixes are Elias-Fano coded, so a row
//! is resolved by LF-mapping backward until a sampled rank is met.

use std::borrow::Cow;
use std::io::{self, Write};

use super::BuildError;
use super::archive::{ArchiveError, Deserializer, Persist, Serializer};
use super::elias_fano::{EliasFano, EliasFanoBuilder};
use super::suffix_array::{Bwt, suffix_array};
use super::wavelet::WaveletMatrix;

/// Default distance between sampled suffix array entries
pub const DEFAULT_SAMPLE_RATE: u32 = 32;

/// Largest text that can be indexed
pub const MAX_TEXT_LEN: u64 = u32::MAX as u64 - 1;

/// How [`FmIndex::locate`] walks the matching rows
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocateMode {
    /// Consecutive rows, for paging through results
    Search,
    /// Rows spread over the whole range, for diverse completions
    Autocomplete,
}

#[derive(Clone, Debug)]
pub struct FmIndex<'a> {
    len: u32,
    sample_rate: u32,
    initial: u32,
    cnt_lt: [u32; 257],
    sampled: EliasFano<'a>,
    ssa: Cow<'a, [u32]>,
    bwt: WaveletMatrix<'a>,
}

fn sampled_count(len: u32, sample_rate: u32) -> u32 {
    len.div_ceil(sample_rate)
}

impl FmIndex<'static> {
    /// Index `text`, keeping one suffix array entry every `sample_rate`
    /// text positions.
    pub fn build(text: &[u8], sample_rate: u32, rrr_sample_rate: u32) -> Result<Self, BuildError> {
        if text.len() as u64 > MAX_TEXT_LEN {
            return Err(BuildError::TextTooLarge(text.len() as u64));
        }
        let len = text.len() as u32;
        let sample_rate = sample_rate.max(1);

        let mut cnt_lt = [0u32; 257];
        for &c in text {
            cnt_lt[c as usize + 1] += 1;
        }
        for c in 0..256 {
            cnt_lt[c + 1] += cnt_lt[c];
        }

        let sa = suffix_array(text);
        let sampled_len = sampled_count(len, sample_rate);
        let mut sampled = EliasFanoBuilder::new(sampled_len, len.saturating_sub(1))?;
        let mut ssa = Vec::with_capacity(sampled_len as usize);
        for (rank, &pos) in sa.iter().enumerate() {
            if pos % sample_rate == 0 {
                ssa.push(pos);
                sampled.push(rank as u32)?;
            }
        }

        let Bwt { bytes, initial } = Bwt::from_suffix_array(text, &sa);
        drop(sa);

        Ok(Self {
            len,
            sample_rate,
            initial,
            cnt_lt,
            sampled: sampled.build(rrr_sample_rate)?,
            ssa: Cow::Owned(ssa),
            bwt: WaveletMatrix::build(&bytes, rrr_sample_rate),
        })
    }
}

impl<'a> FmIndex<'a> {
    /// Length of the indexed text
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Approximate size of the index payload in bytes
    pub fn size_in_bytes(&self) -> usize {
        self.cnt_lt.len() * 4
            + self.sampled.size_in_bytes()
            + self.ssa.len() * 4
            + self.bwt.size_in_bytes()
    }

    /// Map row `pos` through symbol `c`
    #[inline]
    fn lf(&self, c: u8, pos: u32) -> u32 {
        let shifted = pos + (pos < self.initial) as u32;
        self.cnt_lt[c as usize] + self.bwt.rank(c, shifted)
    }

    /// Half-open range of rows whose suffixes start with `pattern`.
    /// An empty pattern matches every row.
    pub fn get_range(&self, pattern: &[u8]) -> (u32, u32) {
        let Some((&last, rest)) = pattern.split_last() else {
            return (0, self.len);
        };
        let mut l = self.cnt_lt[last as usize];
        let mut h = self.cnt_lt[last as usize + 1];
        for &c in rest.iter().rev() {
            if l >= h {
                break;
            }
            l = self.lf(c, l);
            h = self.lf(c, h);
        }
        (l, h)
    }

    /// Number of occurrences of `pattern`
    pub fn count(&self, pattern: &[u8]) -> u32 {
        let (l, h) = self.get_range(pattern);
        h.saturating_sub(l)
    }

    /// Text offset of the suffix at row `row`
    pub fn resolve(&self, row: u32) -> u32 {
        let mut i = row;
        let mut steps = 0;
        while !self.sampled.contains(i) {
            let pos = i + (i < self.initial) as u32;
            let c = self.bwt.access(pos);
            i = self.cnt_lt[c as usize] + self.bwt.rank(c, pos);
            steps += 1;
        }
        let idx = self.sampled.lower_bound(i) as usize;
        self.ssa.get(idx).map_or(0, |&offset| offset + steps)
    }

    /// Append the text offsets of matches of `pattern` to `out` until it
    /// holds `limit` entries, and return the total number of matches.
    ///
    /// The first `*skip` matches are passed over and deducted from `skip`,
    /// so one skip value can be threaded through several indices.
    pub fn locate(
        &self,
        pattern: &[u8],
        mode: LocateMode,
        limit: usize,
        skip: &mut u32,
        out: &mut Vec<u32>,
    ) -> u32 {
        let (mut l, h) = self.get_range(pattern);
        let total = h.saturating_sub(l);
        if total == 0 {
            return 0;
        }

        let delta = total.min(*skip);
        l += delta;
        *skip -= delta;
        if limit == 0 {
            return total;
        }

        let step = match mode {
            LocateMode::Search => 1,
            LocateMode::Autocomplete => (((h - l) as usize / limit).max(1)) as u32,
        };
        while l < h && out.len() < limit {
            out.push(self.resolve(l));
            l = l.saturating_add(step);
        }
        total
    }
}

impl<'a> Persist<'a> for FmIndex<'a> {
    fn persist<W: Write>(&self, out: &mut Serializer<W>) -> io::Result<()> {
        out.scalar(self.len)?;
        out.scalar(self.sample_rate)?;
        out.scalar(self.initial)?;
        out.array(&self.cnt_lt)?;
        self.sampled.persist(out)?;
        out.array::<u32>(&self.ssa)?;
        self.bwt.persist(out)
    }

    fn restore(input: &mut Deserializer<'a>) -> Result<Self, ArchiveError> {
        let len: u32 = input.scalar()?;
        let sample_rate: u32 = input.scalar()?;
        let initial: u32 = input.scalar()?;
        let counts = input.array::<u32>()?;
        let cnt_lt: [u32; 257] = counts
            .try_into()
            .map_err(|_| ArchiveError::Corrupt("symbol count table"))?;
        let sampled = EliasFano::restore(input)?;
        let ssa = input.array::<u32>()?;
        let bwt = WaveletMatrix::restore(input)?;

        if sample_rate == 0
            || initial > len
            || cnt_lt[0] != 0
            || cnt_lt[256] != len
            || cnt_lt.windows(2).any(|w| w[0] > w[1])
            || sampled.len() != sampled_count(len, sample_rate)
            || ssa.len() != sampled.len() as usize
            || bwt.len() != len
        {
            return Err(ArchiveError::Corrupt("fm-index layout"));
        }

        Ok(Self {
            len,
            sample_rate,
            initial,
            cnt_lt,
            sampled,
            ssa: Cow::Borrowed(ssa),
            bwt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::archive::HEADER_LEN;

    fn occurrences(text: &[u8], pattern: &[u8]) -> Vec<u32> {
        if pattern.is_empty() {
            return (0..text.len() as u32).collect();
        }
        text.windows(pattern.len())
            .enumerate()
            .filter(|(_, w)| *w == pattern)
            .map(|(i, _)| i as u32)
            .collect()
    }

    fn locate_all(fm: &FmIndex<'_>, pattern: &[u8]) -> Vec<u32> {
        let mut out = Vec::new();
        let mut skip = 0;
        fm.locate(pattern, LocateMode::Search, fm.len() as usize, &mut skip, &mut out);
        out.sort_unstable();
        out
    }

    #[test]
    fn test_aabababa_scenario() {
        let text = b"aabababa";
        let fm = FmIndex::build(text, 2, 4).unwrap();
        assert_eq!(fm.count(b"ab"), 3);

        let mut out = Vec::new();
        let mut skip = 0;
        let total = fm.locate(b"ab", LocateMode::Search, 3, &mut skip, &mut out);
        assert_eq!(total, 3);
        out.sort_unstable();
        assert_eq!(out, vec![1, 3, 5]);
        for off in out {
            assert_eq!(&text[off as usize..off as usize + 2], b"ab");
        }
    }

    #[test]
    fn test_every_substring_is_found() {
        let text = b"she sells sea shells by the sea shore";
        let fm = FmIndex::build(text, 3, 4).unwrap();
        for len in 1..6 {
            for start in 0..=text.len() - len {
                let pattern = &text[start..start + len];
                assert!(fm.count(pattern) >= 1);
                assert_eq!(locate_all(&fm, pattern), occurrences(text, pattern));
            }
        }
        assert_eq!(fm.count(b"shellfish"), 0);
        assert_eq!(fm.count(b"zz"), 0);
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        let text = b"abcabc";
        let fm = FmIndex::build(text, 4, 8).unwrap();
        assert_eq!(fm.count(b""), 6);
        assert_eq!(locate_all(&fm, b""), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_skip_is_consumed_across_calls() {
        let text = b"xyxyxy";
        let fm = FmIndex::build(text, 1, 8).unwrap();
        let mut out = Vec::new();
        let mut skip = 5;
        assert_eq!(fm.locate(b"xy", LocateMode::Search, 10, &mut skip, &mut out), 3);
        assert!(out.is_empty());
        assert_eq!(skip, 2);

        assert_eq!(fm.locate(b"xy", LocateMode::Search, 10, &mut skip, &mut out), 3);
        assert_eq!(skip, 0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_zero_limit_returns_total_only() {
        let fm = FmIndex::build(b"banana", 2, 8).unwrap();
        let mut out = Vec::new();
        let mut skip = 0;
        assert_eq!(fm.locate(b"an", LocateMode::Autocomplete, 0, &mut skip, &mut out), 2);
        assert!(out.is_empty());
    }

    #[test]
    fn test_autocomplete_spreads_over_range() {
        let text: Vec<u8> = b"ka".iter().cycle().take(200).copied().collect();
        let fm = FmIndex::build(&text, 8, 8).unwrap();
        let mut out = Vec::new();
        let mut skip = 0;
        let total = fm.locate(b"k", LocateMode::Autocomplete, 4, &mut skip, &mut out);
        assert_eq!(total, 100);
        assert_eq!(out.len(), 4);
        // stride 25 over rows sorted by suffix, longer "kaka.." suffixes last
        let mut expected: Vec<u32> = (0..100).map(|i| 198 - 2 * i).collect();
        expected = expected.into_iter().step_by(25).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_restore_from_archive() {
        let text = b"the cat sat on the mat with the hat";
        let fm = FmIndex::build(text, 4, 2).unwrap();
        let mut out = Serializer::new(Vec::new(), HEADER_LEN as u64);
        fm.persist(&mut out).unwrap();
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes.extend(out.into_inner());

        let mut words = vec![0u64; bytes.len().div_ceil(8)];
        bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..bytes.len()].copy_from_slice(&bytes);
        let buf = &bytemuck::cast_slice::<u64, u8>(&words)[..bytes.len()];

        let mut input = Deserializer::new(buf, HEADER_LEN);
        let restored = FmIndex::restore(&mut input).unwrap();
        assert!(input.is_at_end());
        assert_eq!(restored.len(), fm.len());
        assert_eq!(restored.initial(), fm.initial());
        assert_eq!(locate_all(&restored, b"at"), occurrences(text, b"at"));
        assert_eq!(restored.count(b"the"), 3);
    }
}
