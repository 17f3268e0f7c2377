//! Linear-time suffix array construction (SA-IS).
//!
//! Suffixes are classified as S-type or L-type, the leftmost S-type
//! positions (LMS) are sorted by inducing from an initial bucket placement,
//! LMS substrings are named, and if names collide the reduced string is
//! sorted recursively. The final order is induced from the sorted LMS
//! suffixes.
//!
//! The byte text is lifted to a `u32` alphabet shifted by one so a virtual
//! sentinel `0` can terminate it. NUL bytes in the input are ordinary
//! symbols.

const EMPTY: u32 = u32::MAX;

/// Suffix array of `text`: the start offsets of all suffixes in
/// lexicographic order, a suffix sorting before any longer suffix it prefixes.
pub fn suffix_array(text: &[u8]) -> Vec<u32> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lifted: Vec<u32> = Vec::with_capacity(text.len() + 1);
    lifted.extend(text.iter().map(|&b| b as u32 + 1));
    lifted.push(0);

    let mut sa = vec![EMPTY; lifted.len()];
    sais(&lifted, 257, &mut sa);
    drop(lifted);

    // the sentinel suffix always sorts first
    sa.remove(0);
    sa
}

/// Suffix type per position: `true` for S-type
fn classify(s: &[u32]) -> Vec<bool> {
    let n = s.len();
    let mut stype = vec![false; n];
    stype[n - 1] = true;
    for i in (0..n - 1).rev() {
        stype[i] = s[i] < s[i + 1] || (s[i] == s[i + 1] && stype[i + 1]);
    }
    stype
}

#[inline]
fn is_lms(stype: &[bool], i: usize) -> bool {
    i > 0 && stype[i] && !stype[i - 1]
}

fn bucket_sizes(s: &[u32], alphabet: usize) -> Vec<u32> {
    let mut sizes = vec![0u32; alphabet];
    for &c in s {
        sizes[c as usize] += 1;
    }
    sizes
}

fn bucket_heads(sizes: &[u32]) -> Vec<u32> {
    let mut sum = 0;
    sizes
        .iter()
        .map(|&size| {
            let head = sum;
            sum += size;
            head
        })
        .collect()
}

fn bucket_tails(sizes: &[u32]) -> Vec<u32> {
    let mut sum = 0;
    sizes
        .iter()
        .map(|&size| {
            sum += size;
            sum
        })
        .collect()
}

/// Place `lms` (in the given order) at their bucket tails, then induce L-type
/// suffixes left to right and S-type suffixes right to left.
fn induce(s: &[u32], stype: &[bool], sizes: &[u32], lms: &[u32], sa: &mut [u32]) {
    sa.fill(EMPTY);

    let mut tails = bucket_tails(sizes);
    for &p in lms.iter().rev() {
        let c = s[p as usize] as usize;
        tails[c] -= 1;
        sa[tails[c] as usize] = p;
    }

    let mut heads = bucket_heads(sizes);
    for i in 0..sa.len() {
        let p = sa[i];
        if p != EMPTY && p > 0 && !stype[p as usize - 1] {
            let c = s[p as usize - 1] as usize;
            sa[heads[c] as usize] = p - 1;
            heads[c] += 1;
        }
    }

    let mut tails = bucket_tails(sizes);
    for i in (0..sa.len()).rev() {
        let p = sa[i];
        if p != EMPTY && p > 0 && stype[p as usize - 1] {
            let c = s[p as usize - 1] as usize;
            tails[c] -= 1;
            sa[tails[c] as usize] = p - 1;
        }
    }
}

/// Whether the LMS substrings starting at `a` and `b` are identical
fn lms_substrings_equal(s: &[u32], stype: &[bool], a: usize, b: usize) -> bool {
    let last = s.len() - 1;
    if a == last || b == last {
        return false;
    }
    let mut d = 0;
    loop {
        if s[a + d] != s[b + d] || stype[a + d] != stype[b + d] {
            return false;
        }
        if d > 0 {
            let (a_end, b_end) = (is_lms(stype, a + d), is_lms(stype, b + d));
            if a_end || b_end {
                return a_end && b_end;
            }
        }
        d += 1;
    }
}

/// Sort the suffixes of `s`, which must end with a unique smallest symbol 0.
fn sais(s: &[u32], alphabet: usize, sa: &mut [u32]) {
    let n = s.len();
    if n == 1 {
        sa[0] = 0;
        return;
    }

    let stype = classify(s);
    let sizes = bucket_sizes(s, alphabet);
    let lms: Vec<u32> = (1..n).filter(|&i| is_lms(&stype, i)).map(|i| i as u32).collect();

    // stage 1: sort LMS substrings
    induce(s, &stype, &sizes, &lms, sa);

    // name LMS substrings in sorted order; the name of position p goes to
    // sa[sorted_lms + p / 2], LMS positions being at least two apart
    let mut sorted_lms = 0;
    for i in 0..n {
        let p = sa[i];
        if p != EMPTY && is_lms(&stype, p as usize) {
            sa[sorted_lms] = p;
            sorted_lms += 1;
        }
    }
    sa[sorted_lms..].fill(EMPTY);

    let mut names = 0u32;
    let mut prev: Option<usize> = None;
    for i in 0..sorted_lms {
        let p = sa[i] as usize;
        if prev.is_none_or(|q| !lms_substrings_equal(s, &stype, q, p)) {
            names += 1;
        }
        prev = Some(p);
        sa[sorted_lms + p / 2] = names - 1;
    }

    let reduced: Vec<u32> = sa[sorted_lms..]
        .iter()
        .copied()
        .filter(|&name| name != EMPTY)
        .collect();

    // stage 2: order of the LMS suffixes
    let mut reduced_sa = vec![EMPTY; reduced.len()];
    if (names as usize) < reduced.len() {
        sais(&reduced, names as usize, &mut reduced_sa);
    } else {
        for (i, &name) in reduced.iter().enumerate() {
            reduced_sa[name as usize] = i as u32;
        }
    }

    // stage 3: induce the full order from sorted LMS suffixes
    let ordered: Vec<u32> = reduced_sa.iter().map(|&r| lms[r as usize]).collect();
    induce(s, &stype, &sizes, &ordered, sa);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(text: &[u8]) -> Vec<u32> {
        let mut sa: Vec<u32> = (0..text.len() as u32).collect();
        sa.sort_by(|&a, &b| text[a as usize..].cmp(&text[b as usize..]));
        sa
    }

    #[test]
    fn test_banana() {
        assert_eq!(suffix_array(b"banana"), vec![5, 3, 1, 0, 4, 2]);
    }

    #[test]
    fn test_matches_naive_sort() {
        let texts: [&[u8]; 7] = [
            b"a",
            b"aaaaaaaa",
            b"aabababa",
            b"mississippi",
            b"abracadabra abracadabra",
            b"\x00\x00\x01\x00\xff\x00",
            b"the quick brown fox jumps over the lazy dog the end",
        ];
        for text in texts {
            assert_eq!(suffix_array(text), naive(text), "{:?}", text);
        }
    }

    #[test]
    fn test_repetitive_text_recurses() {
        let text: Vec<u8> = b"abcab".iter().cycle().take(997).copied().collect();
        assert_eq!(suffix_array(&text), naive(&text));
    }

    #[test]
    fn test_empty() {
        assert!(suffix_array(b"").is_empty());
    }
}
