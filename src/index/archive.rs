//! Flat binary archive for index structures.
//!
//! Every persisted structure implements [`Persist`], writing its scalars as
//! raw little-endian copies and its word arrays as a `u32` element count
//! followed by zero padding up to the element alignment and the raw
//! elements. Alignment is computed against the absolute file position, so
//! when the file is mapped at a page boundary the arrays can be handed back
//! as typed slices without copying.
//!
//! ```text
//! +-------+--------+----------------------------------------------+
//! | magic | length | body: scalars, [count][pad][elements], ...   |
//! | 4 B   | 4 B LE |                                              |
//! +-------+--------+----------------------------------------------+
//! ```

use std::io::{self, Write};
use std::mem::{align_of, size_of};

use bytemuck::Pod;
use thiserror::Error;

const _: () = assert!(
    cfg!(target_endian = "little"),
    "index files are read back through native-endian slices"
);

/// Magic of a fully written index file
pub const MAGIC_GOOD: [u8; 4] = *b"GOOD";

/// Magic written before the body, replaced once the body is complete
pub const MAGIC_BAD: [u8; 4] = *b"BAD ";

/// Size of the magic + data length header
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("array at offset {0} is not aligned for zero-copy access")]
    Misaligned(usize),
    #[error("corrupt archive: {0}")]
    Corrupt(&'static str),
}

/// A structure that can be written to and restored from an archive.
///
/// Restored values borrow their arrays from the archive buffer.
pub trait Persist<'a>: Sized {
    fn persist<W: Write>(&self, out: &mut Serializer<W>) -> io::Result<()>;
    fn restore(input: &mut Deserializer<'a>) -> Result<Self, ArchiveError>;
}

/// Writes scalars and padded arrays while tracking the file position
pub struct Serializer<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> Serializer<W> {
    /// `position` is the absolute file offset the first byte will land at
    pub fn new(inner: W, position: u64) -> Self {
        Self { inner, position }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn pad_to(&mut self, align: usize) -> io::Result<()> {
        const ZEROS: [u8; 16] = [0; 16];
        let rem = (self.position % align as u64) as usize;
        if rem != 0 {
            self.write_raw(&ZEROS[..align - rem])?;
        }
        Ok(())
    }

    pub fn scalar<T: Pod>(&mut self, value: T) -> io::Result<()> {
        self.write_raw(bytemuck::bytes_of(&value))
    }

    pub fn array<T: Pod>(&mut self, items: &[T]) -> io::Result<()> {
        let count = u32::try_from(items.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "array too long"))?;
        self.scalar(count)?;
        self.pad_to(align_of::<T>())?;
        self.write_raw(bytemuck::cast_slice(items))
    }
}

/// Cursor over a mapped archive handing out borrowed views
pub struct Deserializer<'a> {
    buf: &'a [u8],
    position: usize,
}

impl<'a> Deserializer<'a> {
    /// `buf` is the whole file, `position` the offset of the first body byte
    pub fn new(buf: &'a [u8], position: usize) -> Self {
        Self { buf, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_at_end(&self) -> bool {
        self.position == self.buf.len()
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], ArchiveError> {
        let available = self.buf.len() - self.position;
        if needed > available {
            return Err(ArchiveError::Truncated {
                offset: self.position,
                needed,
                available,
            });
        }
        let bytes = &self.buf[self.position..self.position + needed];
        self.position += needed;
        Ok(bytes)
    }

    pub fn scalar<T: Pod>(&mut self) -> Result<T, ArchiveError> {
        let bytes = self.take(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn array<T: Pod>(&mut self) -> Result<&'a [T], ArchiveError> {
        let count: u32 = self.scalar()?;
        let rem = self.position % align_of::<T>();
        if rem != 0 {
            self.take(align_of::<T>() - rem)?;
        }
        let offset = self.position;
        let needed = (count as usize)
            .checked_mul(size_of::<T>())
            .ok_or(ArchiveError::Corrupt("array length overflow"))?;
        let bytes = self.take(needed)?;
        bytemuck::try_cast_slice(bytes).map_err(|_| ArchiveError::Misaligned(offset))
    }
}

impl<'a> Persist<'a> for u32 {
    fn persist<W: Write>(&self, out: &mut Serializer<W>) -> io::Result<()> {
        out.scalar(*self)
    }

    fn restore(input: &mut Deserializer<'a>) -> Result<Self, ArchiveError> {
        input.scalar()
    }
}

/// Encode an index file header
pub fn encode_header(magic: [u8; 4], data_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&magic);
    header[4..].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Split a header into magic and data length
pub fn decode_header(bytes: &[u8]) -> Option<([u8; 4], u32)> {
    let header: &[u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&header[..4]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    Some((magic, len))
}
