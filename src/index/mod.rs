//! Compressed full-text index engine.
//!
//! Leaves first:
//!
//! - [`bitset`] - fixed-length bit array with multi-bit fields
//! - [`rrr`] - RRR compressed rank/select bit vector
//! - [`elias_fano`] - monotone sequence coding
//! - [`suffix_array`] - SA-IS construction and the BWT
//! - [`wavelet`] - byte wavelet matrix over RRR layers
//! - [`fm_index`] - count and locate
//! - [`archive`] - flat, mmap-friendly persistence
//! - [`header`], [`build`], [`entry`] - index files on disk and loaded entries
//! - [`stats`] - per-directory index report

pub mod archive;
pub mod bitset;
pub mod build;
pub mod elias_fano;
pub mod entry;
pub mod fm_index;
pub mod header;
pub mod rrr;
pub mod stats;
pub mod suffix_array;
pub mod wavelet;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use build::{BuildOutcome, BuildParams, build_index};
pub use entry::{Entry, LoadError};
pub use fm_index::{FmIndex, LocateMode};
pub use header::HeaderStatus;

/// Errors raised while constructing or writing an index
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("text of {0} bytes exceeds the index size limit")]
    TextTooLarge(u64),
    #[error("sequence of {0} values exceeds the Elias-Fano limit")]
    SequenceTooLong(u32),
    #[error("sequence already holds its {0} values")]
    SequenceFull(u32),
    #[error("value {value} exceeds bound {bound}")]
    OutOfBound { value: u32, bound: u32 },
    #[error("value {value} pushed after {last}")]
    Unsorted { value: u32, last: u32 },
    #[error("sequence holds {pushed} of {expected} values")]
    SequenceIncomplete { pushed: u32, expected: u32 },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Path of the index file belonging to `data_path`
pub fn index_path_for(data_path: &Path, index_suffix: &str) -> PathBuf {
    let mut name = OsString::from(data_path.as_os_str());
    name.push(index_suffix);
    PathBuf::from(name)
}
