//! Runs one decoded query against a catalog snapshot.

use std::io::{self, Write};
use std::ops::Bound;
use std::sync::Arc;

use crate::catalog::Snapshot;
use crate::index::{Entry, LocateMode};
use crate::server::protocol::{Query, QueryMode, escape};

/// Result caps applied to every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// Completions gathered before the remaining files are only counted
    pub autocomplete_limit: usize,
    /// Bytes of context shown after the pattern in a completion
    pub autocomplete_length: usize,
    /// Matches listed per search request
    pub search_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            autocomplete_limit: 20,
            autocomplete_length: 20,
            search_limit: 20,
        }
    }
}

fn bound(value: Option<&str>) -> Bound<&str> {
    value.map_or(Bound::Unbounded, Bound::Included)
}

/// Write the response for `query` and return the total match count it ends with
pub fn execute<W: Write>(
    snapshot: &Snapshot<Arc<Entry>>,
    query: &Query,
    limits: &QueryLimits,
    out: &mut W,
) -> io::Result<u32> {
    let files = snapshot.range_rev(bound(query.begin.as_deref()), bound(query.end.as_deref()));
    let total = match query.mode {
        QueryMode::Autocomplete => autocomplete(files, &query.pattern, limits, out)?,
        QueryMode::Search { skip } => search(files, &query.pattern, skip, limits.search_limit, out)?,
    };
    writeln!(out, "{total}")?;
    Ok(total)
}

struct Candidate<'s> {
    name: &'s str,
    offset: u32,
    context: &'s [u8],
}

/// List completions, at most `autocomplete_limit` gathered across files.
///
/// Completions are deduplicated by context over the whole response, not
/// only between neighbours in (name, offset) order: a context seen in two
/// files or at two distant offsets is listed once, at its earliest
/// (name, offset).
fn autocomplete<'s, W: Write>(
    files: impl Iterator<Item = (&'s String, &'s Arc<Entry>)>,
    pattern: &[u8],
    limits: &QueryLimits,
    out: &mut W,
) -> io::Result<u32> {
    let mut total: u32 = 0;
    let mut offsets = Vec::new();
    let mut candidates = Vec::new();
    let mut skip = 0;

    for (name, entry) in files {
        if offsets.len() >= limits.autocomplete_limit {
            total = total.saturating_add(entry.fm().count(pattern));
            continue;
        }
        let start = offsets.len();
        let found = entry.fm().locate(
            pattern,
            LocateMode::Autocomplete,
            limits.autocomplete_limit,
            &mut skip,
            &mut offsets,
        );
        total = total.saturating_add(found);

        let data = entry.data();
        for &offset in &offsets[start..] {
            let end = (offset as usize + pattern.len() + limits.autocomplete_length).min(data.len());
            candidates.push(Candidate {
                name,
                offset,
                context: &data[offset as usize..end],
            });
        }
    }

    // one line per distinct completion, the earliest (name, offset) wins
    candidates.sort_by(|a, b| {
        a.context
            .cmp(b.context)
            .then_with(|| a.name.cmp(b.name))
            .then(a.offset.cmp(&b.offset))
    });
    candidates.dedup_by(|later, first| later.context == first.context);
    candidates.sort_by(|a, b| a.name.cmp(b.name).then(a.offset.cmp(&b.offset)));

    for candidate in &candidates {
        writeln!(
            out,
            "{}\t{}\t{}",
            candidate.name,
            candidate.offset,
            escape(candidate.context)
        )?;
    }
    Ok(total)
}

fn search<'s, W: Write>(
    files: impl Iterator<Item = (&'s String, &'s Arc<Entry>)>,
    pattern: &[u8],
    mut skip: u32,
    limit: usize,
    out: &mut W,
) -> io::Result<u32> {
    let mut total: u32 = 0;
    let mut offsets = Vec::new();

    for (name, entry) in files {
        if offsets.len() >= limit {
            // listing is full, keep the total exact
            total = total.saturating_add(entry.fm().count(pattern));
            continue;
        }
        let start = offsets.len();
        total = total.saturating_add(entry.fm().locate(
            pattern,
            LocateMode::Search,
            limit,
            &mut skip,
            &mut offsets,
        ));
        for offset in &offsets[start..] {
            writeln!(out, "{name}\t{offset}\t{}", pattern.len())?;
        }
    }
    Ok(total)
}
