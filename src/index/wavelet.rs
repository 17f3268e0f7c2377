//! Wavelet matrix over bytes, one RRR layer per bit plane.
//!
//! Level `d` stores bit `7 - d` of every symbol, in the order the symbols
//! have after being stably partitioned by the bits of the previous levels
//! (zeros first). The number of zeros of a level is where the ones start in
//! the next level.

use std::io::{self, Write};

use super::archive::{ArchiveError, Deserializer, Persist, Serializer};
use super::bitset::BitSet;
use super::rrr::Rrr;

pub const LEVELS: usize = 8;

#[derive(Clone, Debug)]
pub struct WaveletMatrix<'a> {
    len: u32,
    layers: Vec<Rrr<'a>>,
}

impl WaveletMatrix<'static> {
    pub fn build(symbols: &[u8], sample_len: u32) -> Self {
        let len = symbols.len() as u32;
        let mut current = symbols.to_vec();
        let mut zeros = Vec::with_capacity(current.len());
        let mut ones = Vec::with_capacity(current.len());
        let mut layers = Vec::with_capacity(LEVELS);

        for depth in 0..LEVELS {
            let shift = 7 - depth;
            let mut bits = BitSet::new(len);
            for (i, &c) in current.iter().enumerate() {
                if (c >> shift) & 1 == 1 {
                    bits.set(i as u32);
                    ones.push(c);
                } else {
                    zeros.push(c);
                }
            }
            layers.push(Rrr::build(&bits, 0, sample_len));
            current.clear();
            current.append(&mut zeros);
            current.append(&mut ones);
        }

        Self { len, layers }
    }
}

impl<'a> WaveletMatrix<'a> {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.layers.iter().map(Rrr::size_in_bytes).sum()
    }

    /// Symbol at position `i`
    pub fn access(&self, mut i: u32) -> u8 {
        let mut symbol = 0u8;
        for layer in &self.layers {
            symbol <<= 1;
            if layer.get(i) {
                symbol |= 1;
                i = layer.count_zeros() + layer.rank1(i);
            } else {
                i = layer.rank0(i);
            }
        }
        symbol
    }

    /// Occurrences of `symbol` in `[0, i)`
    pub fn rank(&self, symbol: u8, i: u32) -> u32 {
        let mut end = i.min(self.len);
        let mut start = 0;
        for (depth, layer) in self.layers.iter().enumerate() {
            if (symbol >> (7 - depth)) & 1 == 1 {
                let z = layer.count_zeros();
                start = z + layer.rank1(start);
                end = z + layer.rank1(end);
            } else {
                start = layer.rank0(start);
                end = layer.rank0(end);
            }
        }
        end - start
    }

    /// Position of the `k`-th (0-based) occurrence of `symbol`
    pub fn select(&self, symbol: u8, k: u32) -> Option<u32> {
        // start of the symbol's run on every level
        let mut starts = [0u32; LEVELS + 1];
        let mut end = self.len;
        for (depth, layer) in self.layers.iter().enumerate() {
            let start = starts[depth];
            if (symbol >> (7 - depth)) & 1 == 1 {
                let z = layer.count_zeros();
                starts[depth + 1] = z + layer.rank1(start);
                end = z + layer.rank1(end);
            } else {
                starts[depth + 1] = layer.rank0(start);
                end = layer.rank0(end);
            }
        }
        if k >= end - starts[LEVELS] {
            return None;
        }

        let mut pos = starts[LEVELS] + k;
        for (depth, layer) in self.layers.iter().enumerate().rev() {
            pos = if (symbol >> (7 - depth)) & 1 == 1 {
                layer.select1(pos - layer.count_zeros())?
            } else {
                layer.select0(pos)?
            };
        }
        Some(pos)
    }
}

impl<'a> Persist<'a> for WaveletMatrix<'a> {
    fn persist<W: Write>(&self, out: &mut Serializer<W>) -> io::Result<()> {
        out.scalar(self.len)?;
        for layer in &self.layers {
            layer.persist(out)?;
        }
        Ok(())
    }

    fn restore(input: &mut Deserializer<'a>) -> Result<Self, ArchiveError> {
        let len: u32 = input.scalar()?;
        let mut layers = Vec::with_capacity(LEVELS);
        for _ in 0..LEVELS {
            let layer = Rrr::restore(input)?;
            if layer.len() != len {
                return Err(ArchiveError::Corrupt("wavelet layer length"));
            }
            layers.push(layer);
        }
        Ok(Self { len, layers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &[u8] = b"to be or not to be, that is the question\x00\xff\x80";

    #[test]
    fn test_access_reproduces_symbols() {
        let wm = WaveletMatrix::build(TEXT, 4);
        for (i, &c) in TEXT.iter().enumerate() {
            assert_eq!(wm.access(i as u32), c);
        }
    }

    #[test]
    fn test_rank_select_duality() {
        let wm = WaveletMatrix::build(TEXT, 2);
        for symbol in [b't', b' ', b'o', b'q', 0x00, 0xff, 0x80, b'z'] {
            let mut seen = 0;
            for i in 0..=TEXT.len() {
                assert_eq!(wm.rank(symbol, i as u32), seen, "rank({symbol}, {i})");
                if i < TEXT.len() && TEXT[i] == symbol {
                    assert_eq!(wm.select(symbol, seen), Some(i as u32));
                    seen += 1;
                }
            }
            assert_eq!(wm.select(symbol, seen), None);
        }
    }
}
