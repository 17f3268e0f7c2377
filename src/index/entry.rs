//! A loaded index: the data file and its FM-index, both memory mapped.

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

use super::archive::{ArchiveError, Deserializer, HEADER_LEN, Persist};
use super::fm_index::FmIndex;
use super::header::{self, HeaderStatus};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("data file is empty")]
    EmptyData,
    #[error("index {}", .0.describe())]
    Header(HeaderStatus),
    #[error("index body: {0}")]
    Archive(#[from] ArchiveError),
}

impl LoadError {
    /// Whether rebuilding the index file would fix this error
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, LoadError::Header(_) | LoadError::Archive(_))
    }

    pub fn is_missing_index(&self) -> bool {
        matches!(self, LoadError::Header(HeaderStatus::Missing))
    }
}

/// One servable index.
///
/// The FM-index borrows its arrays from `index_map`, which is why it is
/// declared first: fields drop in declaration order.
pub struct Entry {
    fm: FmIndex<'static>,
    index_map: Mmap,
    data_map: Mmap,
}

impl Entry {
    /// Map `data_path` and its index, validating the header and the body
    pub fn open(data_path: &Path, index_path: &Path) -> Result<Self, LoadError> {
        let data_file = File::open(data_path)?;
        let data_len = data_file.metadata()?.len();
        if data_len == 0 {
            return Err(LoadError::EmptyData);
        }

        let index_file = match File::open(index_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LoadError::Header(HeaderStatus::Missing));
            }
            Err(e) => return Err(e.into()),
        };
        // SAFETY: index files are replaced by rename, never rewritten in place
        let index_map = unsafe { Mmap::map(&index_file)? };
        let status = header::check(&index_map, data_len);
        if !status.is_valid() {
            return Err(LoadError::Header(status));
        }
        // SAFETY: data files are append-only; the mapping covers the length checked above
        let data_map = unsafe { Mmap::map(&data_file)? };
        if (data_map.len() as u64) < data_len {
            return Err(LoadError::Header(HeaderStatus::WrongLength {
                recorded: data_len as u32,
                actual: data_map.len() as u64,
            }));
        }

        // SAFETY: the bytes live as long as `index_map`, which is moved into
        // the returned Entry next to `fm` and dropped after it. Moving an
        // Mmap does not move the mapped memory.
        let body: &'static [u8] =
            unsafe { std::slice::from_raw_parts(index_map.as_ptr(), index_map.len()) };
        let mut input = Deserializer::new(body, HEADER_LEN);
        let fm = FmIndex::restore(&mut input)?;
        if !input.is_at_end() {
            return Err(ArchiveError::Corrupt("trailing bytes after index body").into());
        }
        if fm.len() as u64 != data_len {
            return Err(ArchiveError::Corrupt("index length differs from header").into());
        }

        Ok(Self {
            fm,
            index_map,
            data_map,
        })
    }

    pub fn fm(&self) -> &FmIndex<'_> {
        &self.fm
    }

    /// The indexed bytes
    pub fn data(&self) -> &[u8] {
        &self.data_map[..self.fm.len() as usize]
    }

    pub fn len(&self) -> u32 {
        self.fm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fm.is_empty()
    }

    /// Size of the mapped index file
    pub fn index_len(&self) -> usize {
        self.index_map.len()
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("data_len", &self.data_map.len())
            .field("index_len", &self.index_map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build::{BuildParams, build_index};
    use crate::index::fm_index::LocateMode;
    use std::fs;

    #[test]
    fn test_open_serves_queries() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("log.ap");
        let index = dir.path().join("log.ap.fm");
        fs::write(&data, b"GET /index.html\nGET /about.html\nPOST /login\n").unwrap();
        build_index(&data, &index, BuildParams::default()).unwrap();

        let entry = Entry::open(&data, &index).unwrap();
        assert_eq!(entry.len(), 44);
        assert_eq!(entry.fm().count(b"GET"), 2);

        let mut hits = Vec::new();
        let mut skip = 0;
        entry.fm().locate(b"html", LocateMode::Search, 10, &mut skip, &mut hits);
        hits.sort_unstable();
        for off in &hits {
            assert_eq!(&entry.data()[*off as usize..*off as usize + 4], b"html");
        }
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_stale_index_needs_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("log.ap");
        let index = dir.path().join("log.ap.fm");
        fs::write(&data, b"first").unwrap();
        build_index(&data, &index, BuildParams::default()).unwrap();
        fs::write(&data, b"first second").unwrap();

        let err = Entry::open(&data, &index).unwrap_err();
        assert!(err.needs_rebuild());
        assert!(matches!(err, LoadError::Header(HeaderStatus::WrongLength { .. })));
    }

    #[test]
    fn test_missing_index_needs_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("log.ap");
        fs::write(&data, b"content").unwrap();
        let err = Entry::open(&data, &dir.path().join("log.ap.fm")).unwrap_err();
        assert!(err.needs_rebuild());
        assert!(err.is_missing_index());
    }

    #[test]
    fn test_corrupt_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("log.ap");
        let index = dir.path().join("log.ap.fm");
        fs::write(&data, b"some data to index").unwrap();
        build_index(&data, &index, BuildParams::default()).unwrap();

        let mut bytes = fs::read(&index).unwrap();
        bytes.truncate(bytes.len() / 2);
        fs::write(&index, &bytes).unwrap();
        let err = Entry::open(&data, &index).unwrap_err();
        assert!(matches!(err, LoadError::Archive(_)));
        assert!(err.needs_rebuild());
    }
}
