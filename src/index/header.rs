//! Index file header checks.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use super::archive::{HEADER_LEN, MAGIC_GOOD, decode_header};

/// State of an index file relative to its data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    /// Marked GOOD and covering exactly the current data length
    Valid,
    Missing,
    /// Shorter than the header
    Truncated,
    /// Not marked GOOD, usually an interrupted build
    BadMagic,
    WrongLength { recorded: u32, actual: u64 },
}

impl HeaderStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, HeaderStatus::Valid)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            HeaderStatus::Valid => "good",
            HeaderStatus::Missing => "missing",
            HeaderStatus::Truncated => "truncated",
            HeaderStatus::BadMagic => "bad magic",
            HeaderStatus::WrongLength { .. } => "wrong length",
        }
    }
}

/// Check the header at the start of `bytes` against `data_len`
pub fn check(bytes: &[u8], data_len: u64) -> HeaderStatus {
    match decode_header(bytes) {
        None => HeaderStatus::Truncated,
        Some((magic, _)) if magic != MAGIC_GOOD => HeaderStatus::BadMagic,
        Some((_, recorded)) if recorded as u64 != data_len => HeaderStatus::WrongLength {
            recorded,
            actual: data_len,
        },
        Some(_) => HeaderStatus::Valid,
    }
}

/// Read the header of the index file at `path`
pub fn inspect(path: &Path, data_len: u64) -> io::Result<HeaderStatus> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HeaderStatus::Missing),
        Err(e) => return Err(e),
    };
    let mut bytes = Vec::with_capacity(HEADER_LEN);
    file.by_ref().take(HEADER_LEN as u64).read_to_end(&mut bytes)?;
    Ok(check(&bytes, data_len))
}
