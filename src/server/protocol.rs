//! Wire format of the query socket
//!
//! A request is the whole byte stream a client sends before half-closing its
//! side of the connection:
//!
//! ```text
//! skip NUL begin NUL end NUL pattern
//! ```
//!
//! An empty `skip` selects autocomplete, anything else is a search whose
//! first `skip` matches are passed over. `begin` and `end` bound the file
//! names searched (inclusive, empty means unbounded). The pattern runs to the
//! end of the request and may carry C-style escapes.
//!
//! Responses are newline-separated text; bytes outside printable ASCII are
//! rendered as `\xHH`.

use memchr::memchr;
use thiserror::Error;

/// Upper bound on a request, pattern included
pub const MAX_REQUEST_LEN: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request is missing its {0} field")]
    MissingField(&'static str),
    #[error("invalid skip count {0:?}")]
    InvalidSkip(String),
    #[error("file name bound is not valid UTF-8")]
    InvalidName,
    #[error("request exceeds {MAX_REQUEST_LEN} bytes")]
    TooLarge,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Autocomplete,
    Search { skip: u32 },
}

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub mode: QueryMode,
    /// Smallest file name to search
    pub begin: Option<String>,
    /// Largest file name to search
    pub end: Option<String>,
    /// Unescaped pattern bytes
    pub pattern: Vec<u8>,
}

impl Query {
    /// Whether `name` falls inside the requested file name range
    pub fn covers(&self, name: &str) -> bool {
        self.begin.as_deref().is_none_or(|b| b <= name) && self.end.as_deref().is_none_or(|e| name <= e)
    }
}

fn split_field<'a>(buf: &mut &'a [u8], what: &'static str) -> Result<&'a [u8]> {
    let at = memchr(0, buf).ok_or(ProtocolError::MissingField(what))?;
    let field = &buf[..at];
    *buf = &buf[at + 1..];
    Ok(field)
}

fn name_bound(field: &[u8]) -> Result<Option<String>> {
    if field.is_empty() {
        return Ok(None);
    }
    String::from_utf8(field.to_vec())
        .map(Some)
        .map_err(|_| ProtocolError::InvalidName)
}

pub fn parse_request(buf: &[u8]) -> Result<Query> {
    if buf.len() > MAX_REQUEST_LEN {
        return Err(ProtocolError::TooLarge);
    }
    let mut rest = buf;
    let skip = split_field(&mut rest, "skip")?;
    let begin = name_bound(split_field(&mut rest, "begin")?)?;
    let end = name_bound(split_field(&mut rest, "end")?)?;

    let mode = if skip.is_empty() {
        QueryMode::Autocomplete
    } else {
        let text = String::from_utf8_lossy(skip);
        let skip = parse_count(&text).ok_or_else(|| ProtocolError::InvalidSkip(text.into_owned()))?;
        QueryMode::Search { skip }
    };

    Ok(Query {
        mode,
        begin,
        end,
        pattern: unescape(rest),
    })
}

/// Parse a non-negative count the way `strtol(s, _, 0)` reads it:
/// `0x` prefix for hex, a leading `0` for octal, decimal otherwise.
/// The whole string must be consumed.
pub fn parse_count(text: &str) -> Option<u32> {
    let text = text.trim_start();
    let text = text.strip_prefix('+').unwrap_or(text);
    let (digits, radix) = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };
    if digits.is_empty() || !digits.bytes().all(|b| (b as char).is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

/// Decode `\xHH`, the single-letter C escapes and up to three octal digits.
/// Unknown escapes keep their backslash.
pub fn unescape(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] != b'\\' || i + 1 == input.len() {
            out.push(input[i]);
            i += 1;
            continue;
        }
        if input[i + 1] == b'x' && i + 4 <= input.len() {
            out.push(hex_value(input[i + 2]) << 4 | hex_value(input[i + 3]));
            i += 4;
            continue;
        }
        let simple = match input[i + 1] {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b't' => Some(b'\t'),
            b'n' => Some(b'\n'),
            b'v' => Some(0x0b),
            b'f' => Some(0x0c),
            b'r' => Some(b'\r'),
            b'\\' => Some(b'\\'),
            _ => None,
        };
        if let Some(byte) = simple {
            out.push(byte);
            i += 2;
            continue;
        }
        let mut j = i + 1;
        let mut value: u32 = 0;
        while j < input.len() && j < i + 4 && (b'0'..=b'7').contains(&input[j]) {
            value = value * 8 + (input[j] - b'0') as u32;
            j += 1;
        }
        if j > i + 1 {
            out.push(value as u8);
            i = j;
        } else {
            out.push(b'\\');
            i += 1;
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789abcdef";

fn push_hex(out: &mut String, b: u8) {
    out.push_str("\\x");
    out.push(HEX[(b >> 4) as usize] as char);
    out.push(HEX[(b & 15) as usize] as char);
}

/// Render bytes for a response line
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..=0x7e).contains(&b) {
            out.push(b as char);
        } else {
            push_hex(&mut out, b);
        }
    }
    out
}

/// Like [`escape`] but also escapes backslashes, so [`unescape`] restores
/// the exact bytes
pub fn escape_pattern(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b == b'\\' {
            out.push_str("\\\\");
        } else if (0x20..=0x7e).contains(&b) {
            out.push(b as char);
        } else {
            push_hex(&mut out, b);
        }
    }
    out
}

/// Encode a request for the wire
pub fn encode_request(query: &Query) -> Vec<u8> {
    let mut buf = Vec::with_capacity(query.pattern.len() + 16);
    if let QueryMode::Search { skip } = query.mode {
        buf.extend_from_slice(skip.to_string().as_bytes());
    }
    buf.push(0);
    buf.extend_from_slice(query.begin.as_deref().unwrap_or("").as_bytes());
    buf.push(0);
    buf.extend_from_slice(query.end.as_deref().unwrap_or("").as_bytes());
    buf.push(0);
    buf.extend_from_slice(escape_pattern(&query.pattern).as_bytes());
    buf
}
