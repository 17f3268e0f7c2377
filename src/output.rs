//! Output formatting for query results

use std::io::{self, Write};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::server::client::{Hit, QueryResponse};
use crate::server::protocol::escape;

/// Print a response to stdout
pub fn print_response(
    response: &QueryResponse,
    pattern_len: usize,
    color: bool,
    heading: bool,
) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);
    write_response(&mut stdout, response, pattern_len, heading)
}

pub fn write_response<W: WriteColor>(
    out: &mut W,
    response: &QueryResponse,
    pattern_len: usize,
    heading: bool,
) -> io::Result<()> {
    let mut current_file: Option<&str> = None;

    for hit in &response.hits {
        if heading && current_file != Some(hit.name()) {
            if current_file.is_some() {
                // Add blank line between files
                writeln!(out)?;
            }
            out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
            writeln!(out, "{}", hit.name())?;
            out.reset()?;
            current_file = Some(hit.name());
        }

        if !heading {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
            write!(out, "{}", hit.name())?;
            out.reset()?;
            write!(out, ":")?;
        }

        out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(out, "{}", hit.offset())?;
        out.reset()?;

        match hit {
            Hit::Match { len, .. } => writeln!(out, "+{len}")?,
            Hit::Completion { context, .. } => {
                write!(out, ":")?;
                let split = pattern_len.min(context.len());
                out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
                write!(out, "{}", escape(&context[..split]))?;
                out.reset()?;
                writeln!(out, "{}", escape(&context[split..]))?;
            }
        }
    }

    if heading && current_file.is_some() {
        writeln!(out)?;
    }
    out.set_color(ColorSpec::new().set_bold(true))?;
    write!(out, "{}", response.total)?;
    out.reset()?;
    let shown = response.hits.len();
    if (shown as u64) < response.total as u64 {
        writeln!(out, " matches ({shown} shown)")?;
    } else {
        writeln!(out, " matches")?;
    }
    Ok(())
}

/// Listed hits per file (for --count)
pub fn write_counts<W: WriteColor>(out: &mut W, response: &QueryResponse) -> io::Result<()> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for hit in &response.hits {
        match counts.iter_mut().find(|(name, _)| *name == hit.name()) {
            Some((_, count)) => *count += 1,
            None => counts.push((hit.name(), 1)),
        }
    }
    counts.sort_by(|a, b| a.0.cmp(b.0));

    for (name, count) in counts {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        write!(out, "{name}")?;
        out.reset()?;
        write!(out, ":")?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        writeln!(out, "{count}")?;
        out.reset()?;
    }
    Ok(())
}

pub fn print_counts(response: &QueryResponse, color: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    write_counts(&mut StandardStream::stdout(choice), response)
}
