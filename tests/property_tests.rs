//! Randomized checks of the succinct structures against naive models

use proptest::prelude::*;

use fmsearch::index::bitset::BitSet;
use fmsearch::index::elias_fano::EliasFanoBuilder;
use fmsearch::index::rrr::Rrr;
use fmsearch::index::suffix_array::suffix_array;
use fmsearch::index::wavelet::WaveletMatrix;
use fmsearch::index::{FmIndex, LocateMode};

fn naive_occurrences(text: &[u8], pattern: &[u8]) -> Vec<u32> {
    if pattern.is_empty() || pattern.len() > text.len() {
        return Vec::new();
    }
    text.windows(pattern.len())
        .enumerate()
        .filter(|(_, w)| *w == pattern)
        .map(|(i, _)| i as u32)
        .collect()
}

/// Small alphabets make repeats likely
fn text_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(prop::sample::select(b"ab".to_vec()), 0..300),
        prop::collection::vec(prop::sample::select(b"acgt\n".to_vec()), 0..300),
        prop::collection::vec(any::<u8>(), 0..200),
    ]
}

fn block_len_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(0u32), 5u32..=63]
}

proptest! {
    #[test]
    fn suffix_array_is_sorted_permutation(text in text_strategy()) {
        let sa = suffix_array(&text);
        let mut seen = sa.clone();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..text.len() as u32).collect::<Vec<_>>());
        for w in sa.windows(2) {
            prop_assert!(text[w[0] as usize..] < text[w[1] as usize..]);
        }
    }

    #[test]
    fn fm_locate_finds_every_occurrence(
        text in text_strategy(),
        pattern in prop::collection::vec(prop::sample::select(b"abcgt\n".to_vec()), 1..4),
        sample_rate in 1u32..40,
    ) {
        let fm = FmIndex::build(&text, sample_rate, 8).unwrap();
        let expected = naive_occurrences(&text, &pattern);
        prop_assert_eq!(fm.count(&pattern) as usize, expected.len());

        let mut skip = 0;
        let mut found = Vec::new();
        let total = fm.locate(&pattern, LocateMode::Search, usize::MAX, &mut skip, &mut found);
        prop_assert_eq!(total as usize, expected.len());
        found.sort_unstable();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn fm_locate_skip_pages_without_overlap(
        text in prop::collection::vec(prop::sample::select(b"ab".to_vec()), 1..200),
        skip in 0u32..50,
        limit in 1usize..20,
    ) {
        let fm = FmIndex::build(&text, 4, 8).unwrap();
        let mut all = Vec::new();
        let mut none = 0;
        fm.locate(b"a", LocateMode::Search, usize::MAX, &mut none, &mut all);

        let mut remaining = skip;
        let mut page = Vec::new();
        let total = fm.locate(b"a", LocateMode::Search, limit, &mut remaining, &mut page);
        prop_assert_eq!(total as usize, all.len());
        prop_assert_eq!(remaining, skip.saturating_sub(total));
        let start = (skip as usize).min(all.len());
        let end = (start + limit).min(all.len());
        prop_assert_eq!(&page[..], &all[start..end]);
    }

    #[test]
    fn rrr_rank_select_match_bits(
        bits in prop::collection::vec(any::<bool>(), 0..2000),
        block_len in block_len_strategy(),
        sample_len in 1u32..16,
    ) {
        let set = BitSet::from_bits(bits.iter().copied());
        let rrr = Rrr::build(&set, block_len, sample_len);
        prop_assert_eq!(rrr.len() as usize, bits.len());

        let mut ones = 0u32;
        let mut zeros = 0u32;
        for (i, &bit) in bits.iter().enumerate() {
            let i = i as u32;
            prop_assert_eq!(rrr.get(i), bit);
            prop_assert_eq!(rrr.rank1(i), ones);
            if bit {
                prop_assert_eq!(rrr.select1(ones), Some(i));
                ones += 1;
            } else {
                prop_assert_eq!(rrr.select0(zeros), Some(i));
                zeros += 1;
            }
        }
        prop_assert_eq!(rrr.count_ones(), ones);
        prop_assert_eq!(rrr.select1(ones), None);
        prop_assert_eq!(rrr.select0(zeros), None);
    }

    #[test]
    fn elias_fano_rank_counts_values(
        mut values in prop::collection::vec(0u32..100_000, 0..300),
        probes in prop::collection::vec(0u32..110_000, 1..50),
    ) {
        values.sort_unstable();
        let bound = values.last().copied().unwrap_or(0);
        let mut builder = EliasFanoBuilder::new(values.len() as u32, bound).unwrap();
        for &v in &values {
            builder.push(v).unwrap();
        }
        let ef = builder.build(8).unwrap();

        prop_assert_eq!(ef.iter().collect::<Vec<_>>(), values.clone());
        for x in probes {
            let below = values.iter().filter(|&&v| v < x).count() as u32;
            let at_most = values.iter().filter(|&&v| v <= x).count() as u32;
            prop_assert_eq!(ef.lower_bound(x), below);
            prop_assert_eq!(ef.rank(x), at_most);
            prop_assert_eq!(ef.contains(x), values.binary_search(&x).is_ok());
        }
    }

    #[test]
    fn wavelet_matches_naive_rank_select(
        symbols in prop::collection::vec(any::<u8>(), 0..400),
        probe in any::<u8>(),
    ) {
        let wm = WaveletMatrix::build(&symbols, 8);
        let mut seen = 0u32;
        for (i, &s) in symbols.iter().enumerate() {
            prop_assert_eq!(wm.access(i as u32), s);
            prop_assert_eq!(wm.rank(probe, i as u32), seen);
            if s == probe {
                prop_assert_eq!(wm.select(probe, seen), Some(i as u32));
                seen += 1;
            }
        }
        prop_assert_eq!(wm.rank(probe, symbols.len() as u32), seen);
        prop_assert_eq!(wm.select(probe, seen), None);
    }
}
