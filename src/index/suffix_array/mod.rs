//! Suffix array construction and Burrows-Wheeler transform
//!
//! ## Architecture
//!
//! - `builder`: SA-IS construction over the byte alphabet
//! - [`Bwt`]: the transform derived from a suffix array in one pass
//!
//! The suffix array itself is transient. Only the BWT (through the wavelet
//! matrix) and a sample of suffix array entries survive into the FM-index.

pub mod builder;

pub use builder::suffix_array;

/// Burrows-Wheeler transform with an implicit sentinel.
///
/// Row `i` of the conceptual matrix is the rotation starting at the
/// sentinel-terminated suffix of rank `i`. The sentinel row itself is not
/// stored: `initial` is the row where it would sit, and `bytes[0]` holds the
/// last text byte, which precedes the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bwt {
    pub bytes: Vec<u8>,
    pub initial: u32,
}

impl Bwt {
    /// Derive the transform of `text` from its suffix array
    pub fn from_suffix_array(text: &[u8], sa: &[u32]) -> Self {
        let n = text.len();
        debug_assert_eq!(sa.len(), n);
        let mut bytes = vec![0u8; n];
        let mut initial = None;
        if n > 0 {
            bytes[0] = text[n - 1];
        }
        for (i, &pos) in sa.iter().enumerate() {
            if pos == 0 {
                initial = Some(i as u32 + 1);
            } else {
                let row = if initial.is_none() { i + 1 } else { i };
                bytes[row] = text[pos as usize - 1];
            }
        }
        Self {
            bytes,
            initial: initial.unwrap_or(0),
        }
    }

    pub fn build(text: &[u8]) -> Self {
        Self::from_suffix_array(text, &suffix_array(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banana_transform() {
        // rows: $ a$ ana$ anana$ banana$ na$ nana$ with the $ row implicit
        let bwt = Bwt::build(b"banana");
        assert_eq!(bwt.initial, 4);
        assert_eq!(bwt.bytes, b"annbaa".to_vec());
    }

    #[test]
    fn test_single_byte() {
        let bwt = Bwt::build(b"x");
        assert_eq!(bwt.initial, 1);
        assert_eq!(bwt.bytes, b"x".to_vec());
    }
}
