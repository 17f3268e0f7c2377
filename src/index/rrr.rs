//! RRR compressed bit vector with rank and select.
//!
//! The input is cut into blocks of `block_len` bits. Each block is stored as
//! its class (popcount) in a fixed-width field and its offset, the rank of
//! the block among all patterns of the same class, in a field of
//! `ceil(log2(C(block_len, class)))` bits. Every `sample_len` blocks the
//! cumulative rank and the bit position in the offset array are sampled so a
//! query never scans more than `sample_len` blocks.
//!
//! Offsets use the combinatorial number system: a pattern with set bits
//! `c_k > ... > c_1` has offset `sum C(c_i, i)`, which orders same-class
//! patterns by numeric value. Blocks of up to 15 bits decode through a
//! per-class lookup table, longer blocks through the combinadic recurrence.

use std::io::{self, Write};
use std::sync::OnceLock;

use super::archive::{ArchiveError, Deserializer, Persist, Serializer};
use super::bitset::{BitSet, bit_width, clog2, low_mask, select_in_word};

/// Largest block length decoded through lookup tables
pub const TABLE_MAX_BLOCK_LEN: u32 = 15;

/// Largest block length accepted by [`Rrr::build`]
pub const MAX_BLOCK_LEN: u32 = 63;

/// Default number of blocks between samples
pub const DEFAULT_SAMPLE_LEN: u32 = 8;

static BINOMIAL: [[u64; 65]; 65] = binomial_table();

const fn binomial_table() -> [[u64; 65]; 65] {
    let mut table = [[0u64; 65]; 65];
    let mut n = 0;
    while n <= 64 {
        table[n][0] = 1;
        let mut k = 1;
        while k <= n {
            table[n][k] = table[n - 1][k - 1] + table[n - 1][k];
            k += 1;
        }
        n += 1;
    }
    table
}

#[inline]
fn binomial(n: u32, k: u32) -> u64 {
    if k > n { 0 } else { BINOMIAL[n as usize][k as usize] }
}

/// Patterns of each class in offset order, for one block length
struct DecodeTable {
    by_class: Vec<Vec<u16>>,
}

static DECODE_TABLES: [OnceLock<DecodeTable>; TABLE_MAX_BLOCK_LEN as usize + 1] =
    [const { OnceLock::new() }; TABLE_MAX_BLOCK_LEN as usize + 1];

fn decode_table(block_len: u32) -> &'static DecodeTable {
    DECODE_TABLES[block_len as usize].get_or_init(|| {
        let by_class = (0..=block_len)
            .map(|k| {
                let count = binomial(block_len, k);
                let mut patterns = Vec::with_capacity(count as usize);
                let mut x = low_mask(k);
                for idx in 0..count {
                    patterns.push(x as u16);
                    if idx + 1 < count {
                        x = next_same_weight(x);
                    }
                }
                patterns
            })
            .collect();
        DecodeTable { by_class }
    })
}

/// Smallest integer above `x` with the same popcount (Gosper's hack).
/// `x` must be non-zero.
#[inline]
fn next_same_weight(x: u64) -> u64 {
    let y = x | (x - 1);
    (y + 1) | (((!y & y.wrapping_add(1)) - 1) >> (x.trailing_zeros() + 1))
}

/// Combinatorial rank of `block` among `block_len`-bit patterns of its class
fn block_to_offset(block: u64, block_len: u32) -> u64 {
    let mut k = block.count_ones();
    let mut offset = 0;
    let mut m = block_len;
    while k > 0 && m > 0 {
        m -= 1;
        if (block >> m) & 1 == 1 {
            offset += binomial(m, k);
            k -= 1;
        }
    }
    offset
}

/// Inverse of [`block_to_offset`] without tables
fn offset_to_block(mut offset: u64, mut k: u32, block_len: u32) -> u64 {
    let mut block = 0u64;
    let mut m = block_len as i64 - 1;
    while k > 0 && (k as i64) <= m {
        let c = binomial(m as u32, k);
        if c <= offset {
            offset -= c;
            k -= 1;
            block |= 1u64 << m;
        }
        m -= 1;
    }
    // remaining ones fill the lowest positions
    block | low_mask(k)
}

/// Default block length for an `n` bit input
pub fn default_block_len(n: u32) -> u32 {
    clog2(n as u64).max(TABLE_MAX_BLOCK_LEN)
}

#[derive(Clone, Debug)]
pub struct Rrr<'a> {
    len: u32,
    block_len: u32,
    sample_len: u32,
    ones: u32,
    classes: BitSet<'a>,
    offsets: BitSet<'a>,
    rank_samples: BitSet<'a>,
    offset_samples: BitSet<'a>,
    class_bits: u32,
    rank_bits: u32,
    position_bits: u32,
    offset_bits: [u8; 65],
}

fn offset_widths(block_len: u32) -> [u8; 65] {
    let mut widths = [0u8; 65];
    for k in 0..=block_len {
        widths[k as usize] = clog2(binomial(block_len, k)) as u8;
    }
    widths
}

fn num_blocks(len: u32, block_len: u32) -> u64 {
    (len as u64).div_ceil(block_len as u64)
}

impl Rrr<'static> {
    /// Compress `bits`. A `block_len` of 0 picks [`default_block_len`].
    pub fn build(bits: &BitSet<'_>, block_len: u32, sample_len: u32) -> Self {
        let len = bits.len();
        let block_len = match block_len {
            0 => default_block_len(len),
            bl => bl.min(MAX_BLOCK_LEN),
        };
        let sample_len = sample_len.max(1);
        let offset_bits = offset_widths(block_len);
        let class_bits = clog2(block_len as u64 + 1);
        let blocks = num_blocks(len, block_len);
        let samples = blocks.div_ceil(sample_len as u64);

        let read_block = |b: u64| {
            let start = b * block_len as u64;
            let width = (len as u64 - start).min(block_len as u64) as u32;
            bits.get_bits(start, width)
        };

        let mut ones = 0u64;
        let mut total_offset_bits = 0u64;
        for b in 0..blocks {
            let k = read_block(b).count_ones();
            ones += k as u64;
            total_offset_bits += offset_bits[k as usize] as u64;
        }

        let rank_bits = bit_width(ones);
        let position_bits = bit_width(total_offset_bits);
        let mut classes = BitSet::new((blocks * class_bits as u64) as u32);
        let mut offsets = BitSet::new(total_offset_bits as u32);
        let mut rank_samples = BitSet::new((samples * rank_bits as u64) as u32);
        let mut offset_samples = BitSet::new((samples * position_bits as u64) as u32);

        let mut rank = 0u64;
        let mut pos = 0u64;
        for b in 0..blocks {
            if b % sample_len as u64 == 0 {
                let s = b / sample_len as u64;
                rank_samples.set_bits(s * rank_bits as u64, rank_bits, rank);
                offset_samples.set_bits(s * position_bits as u64, position_bits, pos);
            }
            let block = read_block(b);
            let k = block.count_ones();
            let width = offset_bits[k as usize] as u32;
            classes.set_bits(b * class_bits as u64, class_bits, k as u64);
            offsets.set_bits(pos, width, block_to_offset(block, block_len));
            rank += k as u64;
            pos += width as u64;
        }

        Self {
            len,
            block_len,
            sample_len,
            ones: ones as u32,
            classes,
            offsets,
            rank_samples,
            offset_samples,
            class_bits,
            rank_bits,
            position_bits,
            offset_bits,
        }
    }
}

impl<'a> Rrr<'a> {
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn count_ones(&self) -> u32 {
        self.ones
    }

    #[inline]
    pub fn count_zeros(&self) -> u32 {
        self.len - self.ones
    }

    pub fn block_len(&self) -> u32 {
        self.block_len
    }

    /// Size of the compressed payload in bytes
    pub fn size_in_bytes(&self) -> usize {
        8 * (self.classes.words().len()
            + self.offsets.words().len()
            + self.rank_samples.words().len()
            + self.offset_samples.words().len())
    }

    #[inline]
    fn class(&self, block: u64) -> u32 {
        self.classes
            .get_bits(block * self.class_bits as u64, self.class_bits) as u32
    }

    #[inline]
    fn width(&self, class: u32) -> u32 {
        self.offset_bits[class as usize] as u32
    }

    #[inline]
    fn rank_sample(&self, s: u64) -> u64 {
        self.rank_samples
            .get_bits(s * self.rank_bits as u64, self.rank_bits)
    }

    #[inline]
    fn offset_sample(&self, s: u64) -> u64 {
        self.offset_samples
            .get_bits(s * self.position_bits as u64, self.position_bits)
    }

    fn num_samples(&self) -> u64 {
        num_blocks(self.len, self.block_len).div_ceil(self.sample_len as u64)
    }

    /// Raw bits of a block with class `k` whose offset starts at `pos`
    fn decode(&self, k: u32, pos: u64) -> u64 {
        if k == 0 {
            return 0;
        }
        if k == self.block_len {
            return low_mask(k);
        }
        let offset = self.offsets.get_bits(pos, self.width(k));
        if self.block_len <= TABLE_MAX_BLOCK_LEN {
            decode_table(self.block_len).by_class[k as usize]
                .get(offset as usize)
                .map_or(0, |&p| p as u64)
        } else {
            offset_to_block(offset, k, self.block_len)
        }
    }

    pub fn get(&self, i: u32) -> bool {
        debug_assert!(i < self.len);
        let b = (i / self.block_len) as u64;
        let s = b / self.sample_len as u64;
        let mut pos = self.offset_sample(s);
        for blk in s * self.sample_len as u64..b {
            pos += self.width(self.class(blk)) as u64;
        }
        let block = self.decode(self.class(b), pos);
        (block >> (i % self.block_len)) & 1 == 1
    }

    /// Number of set bits in `[0, i)`
    pub fn rank1(&self, i: u32) -> u32 {
        if i >= self.len {
            return self.ones;
        }
        let b = (i / self.block_len) as u64;
        let bi = i % self.block_len;
        let s = b / self.sample_len as u64;
        let mut rank = self.rank_sample(s);
        let mut pos = self.offset_sample(s);
        for blk in s * self.sample_len as u64..b {
            let k = self.class(blk);
            rank += k as u64;
            pos += self.width(k) as u64;
        }
        if bi > 0 {
            let block = self.decode(self.class(b), pos);
            rank += (block & low_mask(bi)).count_ones() as u64;
        }
        rank as u32
    }

    /// Number of clear bits in `[0, i)`
    #[inline]
    pub fn rank0(&self, i: u32) -> u32 {
        let i = i.min(self.len);
        i - self.rank1(i)
    }

    /// Position of the `kth` (0-based) set bit
    pub fn select1(&self, kth: u32) -> Option<u32> {
        if kth >= self.ones {
            return None;
        }
        self.select_with(kth as u64, false)
    }

    /// Position of the `kth` (0-based) clear bit
    pub fn select0(&self, kth: u32) -> Option<u32> {
        if kth >= self.count_zeros() {
            return None;
        }
        self.select_with(kth as u64, true)
    }

    fn select_with(&self, kth: u64, zeros: bool) -> Option<u32> {
        let bl = self.block_len as u64;
        let sl = self.sample_len as u64;
        let counted = |s: u64| {
            let rank = self.rank_sample(s);
            if zeros { s * sl * bl - rank } else { rank }
        };

        // largest sample whose running count does not exceed kth
        let (mut lo, mut hi) = (0u64, self.num_samples());
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if counted(mid) <= kth {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let mut seen = counted(lo);
        let mut pos = self.offset_sample(lo);
        for blk in lo * sl..num_blocks(self.len, self.block_len) {
            let k = self.class(blk);
            let here = (if zeros { self.block_len - k } else { k }) as u64;
            if seen + here > kth {
                let mut block = self.decode(k, pos);
                if zeros {
                    block = !block & low_mask(self.block_len);
                }
                let bit = select_in_word(block, (kth - seen) as u32);
                return Some((blk * bl) as u32 + bit);
            }
            seen += here;
            pos += self.width(k) as u64;
        }
        None
    }
}

impl<'a> Persist<'a> for Rrr<'a> {
    fn persist<W: Write>(&self, out: &mut Serializer<W>) -> io::Result<()> {
        out.scalar(self.len)?;
        out.scalar(self.block_len)?;
        out.scalar(self.sample_len)?;
        out.scalar(self.ones)?;
        self.classes.persist(out)?;
        self.offsets.persist(out)?;
        self.rank_samples.persist(out)?;
        self.offset_samples.persist(out)
    }

    fn restore(input: &mut Deserializer<'a>) -> Result<Self, ArchiveError> {
        let len: u32 = input.scalar()?;
        let block_len: u32 = input.scalar()?;
        let sample_len: u32 = input.scalar()?;
        let ones: u32 = input.scalar()?;
        if block_len == 0 || block_len > MAX_BLOCK_LEN || sample_len == 0 || ones > len {
            return Err(ArchiveError::Corrupt("rrr parameters"));
        }
        let classes = BitSet::restore(input)?;
        let offsets = BitSet::restore(input)?;
        let rank_samples = BitSet::restore(input)?;
        let offset_samples = BitSet::restore(input)?;

        let class_bits = clog2(block_len as u64 + 1);
        let rank_bits = bit_width(ones as u64);
        let position_bits = bit_width(offsets.len() as u64);
        let blocks = num_blocks(len, block_len);
        let samples = blocks.div_ceil(sample_len as u64);
        if classes.len() as u64 != blocks * class_bits as u64
            || rank_samples.len() as u64 != samples * rank_bits as u64
            || offset_samples.len() as u64 != samples * position_bits as u64
        {
            return Err(ArchiveError::Corrupt("rrr layout"));
        }

        Ok(Self {
            len,
            block_len,
            sample_len,
            ones,
            classes,
            offsets,
            rank_samples,
            offset_samples,
            class_bits,
            rank_bits,
            position_bits,
            offset_bits: offset_widths(block_len),
        })
    }
}
