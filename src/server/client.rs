//! Client for the query socket

use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::server::protocol::{Query, QueryMode, encode_request, unescape};

/// Read/write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// One response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hit {
    Match {
        name: String,
        offset: u32,
        len: u32,
    },
    Completion {
        name: String,
        offset: u32,
        /// Raw bytes starting at the match
        context: Vec<u8>,
    },
}

impl Hit {
    pub fn name(&self) -> &str {
        match self {
            Hit::Match { name, .. } | Hit::Completion { name, .. } => name,
        }
    }

    pub fn offset(&self) -> u32 {
        match self {
            Hit::Match { offset, .. } | Hit::Completion { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResponse {
    pub hits: Vec<Hit>,
    /// Matches across every searched file, listed or not
    pub total: u32,
}

pub struct SearchClient {
    socket_path: PathBuf,
}

impl SearchClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send `query` on a fresh connection and read the whole response
    pub fn query(&self, query: &Query) -> Result<QueryResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).with_context(|| {
            format!(
                "Failed to connect to {} (is the server running?)",
                self.socket_path.display()
            )
        })?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        stream.write_all(&encode_request(query))?;
        stream.shutdown(Shutdown::Write)?;

        let mut lines = Vec::new();
        for line in BufReader::new(&stream).split(b'\n') {
            lines.push(line.context("Failed to read response")?);
        }
        parse_response(&lines, query.mode)
    }
}

fn field<'a>(parts: &mut impl Iterator<Item = &'a [u8]>, what: &str) -> Result<&'a [u8]> {
    match parts.next() {
        Some(part) => Ok(part),
        None => bail!("Response line is missing its {what}"),
    }
}

fn number(bytes: &[u8], what: &str) -> Result<u32> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("Invalid {what} in response: {:?}", String::from_utf8_lossy(bytes)))
}

/// Decode response lines; the last one carries the total
pub fn parse_response(lines: &[Vec<u8>], mode: QueryMode) -> Result<QueryResponse> {
    let Some((last, body)) = lines.split_last() else {
        bail!("Server closed the connection without answering (malformed request?)");
    };
    let total = number(last, "total")?;

    let mut hits = Vec::with_capacity(body.len());
    for line in body {
        let mut parts = line.splitn(3, |&b| b == b'\t');
        let name = String::from_utf8_lossy(field(&mut parts, "file name")?).into_owned();
        let offset = number(field(&mut parts, "offset")?, "offset")?;
        let last = field(&mut parts, "third column")?;
        hits.push(match mode {
            QueryMode::Search { .. } => Hit::Match {
                name,
                offset,
                len: number(last, "match length")?,
            },
            QueryMode::Autocomplete => Hit::Completion {
                name,
                offset,
                context: unescape(last),
            },
        });
    }
    Ok(QueryResponse { hits, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<Vec<u8>> {
        text.lines().map(|l| l.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_parse_search_response() {
        let response = parse_response(&lines("b.ap\t4\t3\na.ap\t0\t3\n7\n"), QueryMode::Search { skip: 0 }).unwrap();
        assert_eq!(response.total, 7);
        assert_eq!(
            response.hits,
            vec![
                Hit::Match {
                    name: "b.ap".into(),
                    offset: 4,
                    len: 3
                },
                Hit::Match {
                    name: "a.ap".into(),
                    offset: 0,
                    len: 3
                },
            ]
        );
    }

    #[test]
    fn test_parse_completion_unescapes_context() {
        let response = parse_response(&lines("a.ap\t9\tkey\\x09value\n1\n"), QueryMode::Autocomplete).unwrap();
        assert_eq!(response.hits[0].name(), "a.ap");
        assert_eq!(response.hits[0].offset(), 9);
        assert!(matches!(&response.hits[0], Hit::Completion { context, .. } if context == b"key\tvalue"));
    }

    #[test]
    fn test_empty_response_is_an_error() {
        assert!(parse_response(&[], QueryMode::Autocomplete).is_err());
        assert!(parse_response(&lines("a.ap\t1\n1\n"), QueryMode::Search { skip: 0 }).is_err());
    }

    #[test]
    fn test_connect_failure_mentions_socket() {
        let dir = tempfile::tempdir().unwrap();
        let client = SearchClient::new(dir.path().join("absent.sock"));
        let query = Query {
            mode: QueryMode::Autocomplete,
            begin: None,
            end: None,
            pattern: b"x".to_vec(),
        };
        let err = client.query(&query).unwrap_err();
        assert!(format!("{err:#}").contains("absent.sock"));
    }
}
