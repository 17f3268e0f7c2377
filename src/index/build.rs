//! Building and writing one index file.
//!
//! A build is atomic from a reader's point of view: the index is written to
//! a temporary sibling whose header says `BAD `, the body is flushed and
//! synced, the header is rewritten as `GOOD`, and only then is the file
//! renamed over the previous index. Mappings of the previous index stay
//! valid because they keep the old inode alive.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use memmap2::Mmap;
use tracing::{debug, info};

use super::BuildError;
use super::archive::{MAGIC_BAD, MAGIC_GOOD, Persist, Serializer, encode_header};
use super::fm_index::{DEFAULT_SAMPLE_RATE, FmIndex, MAX_TEXT_LEN};
use super::header::{self, HeaderStatus};
use super::rrr::DEFAULT_SAMPLE_LEN;

/// Tunables of the index structures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildParams {
    /// Distance between sampled suffix array entries
    pub sample_rate: u32,
    /// Blocks between RRR superblock samples
    pub rrr_sample_rate: u32,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            rrr_sample_rate: DEFAULT_SAMPLE_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Created {
        data_len: u64,
        index_len: u64,
        elapsed: Duration,
    },
    /// The existing index already covers the data
    UpToDate,
    /// Empty data files get no index
    EmptyData,
}

/// Build the index for `data_path` at `index_path` unless a valid one exists
pub fn build_index(
    data_path: &Path,
    index_path: &Path,
    params: BuildParams,
) -> Result<BuildOutcome, BuildError> {
    let data_file = File::open(data_path)?;
    let data_len = data_file.metadata()?.len();
    if data_len == 0 {
        return Ok(BuildOutcome::EmptyData);
    }
    if data_len > MAX_TEXT_LEN {
        return Err(BuildError::TextTooLarge(data_len));
    }

    match header::inspect(index_path, data_len)? {
        HeaderStatus::Valid => return Ok(BuildOutcome::UpToDate),
        HeaderStatus::Missing => {}
        status => info!(
            index = %index_path.display(),
            "{}, rebuilding",
            status.describe()
        ),
    }

    let started = Instant::now();
    // SAFETY: data files are append-only; bytes past `data_len` are ignored
    let data = unsafe { Mmap::map(&data_file)? };
    let index_len = index_prefix(&data, data_len, index_path, params)?;

    Ok(BuildOutcome::Created {
        data_len,
        index_len,
        elapsed: started.elapsed(),
    })
}

/// Index exactly the first `data_len` bytes of `data`.
///
/// The file may have grown since its length was read; the header and the
/// body must agree on the length, so the tail is left for the next build.
pub fn index_prefix(
    data: &[u8],
    data_len: u64,
    index_path: &Path,
    params: BuildParams,
) -> Result<u64, BuildError> {
    if data_len > MAX_TEXT_LEN {
        return Err(BuildError::TextTooLarge(data_len));
    }
    let Some(text) = data.get(..data_len as usize) else {
        return Err(BuildError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("data file shrank below {data_len} bytes"),
        )));
    };
    let fm = FmIndex::build(text, params.sample_rate, params.rrr_sample_rate)?;
    write_index_file(index_path, &fm, data_len as u32)
}

fn temp_path_for(path: &Path) -> PathBuf {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".tmp-{}-{}", std::process::id(), seq));
    PathBuf::from(name)
}

/// Persist `fm` for a data file of `data_len` bytes and return the index size
pub fn write_index_file(path: &Path, fm: &FmIndex<'_>, data_len: u32) -> Result<u64, BuildError> {
    let tmp = temp_path_for(path);
    let result = write_and_rename(&tmp, path, fm, data_len);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(tmp: &Path, path: &Path, fm: &FmIndex<'_>, data_len: u32) -> Result<u64, BuildError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp)?;
    let mut out = Serializer::new(BufWriter::new(file), 0);
    out.scalar(encode_header(MAGIC_BAD, data_len))?;
    fm.persist(&mut out)?;
    let index_len = out.position();

    let mut file = out.into_inner().into_inner().map_err(|e| e.into_error())?;
    file.set_len(index_len)?;
    file.sync_data()?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&encode_header(MAGIC_GOOD, data_len))?;
    file.sync_data()?;
    drop(file);

    fs::rename(tmp, path)?;
    debug!(index = %path.display(), bytes = index_len, "index written");
    Ok(index_len)
}
