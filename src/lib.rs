//! # fmsearch - compressed full-text search over append-only files
//!
//! fmsearch keeps an FM-index next to every data file in a directory and
//! answers substring searches and prefix completions over a Unix socket,
//! rebuilding indices as the files grow.
//!
//! ## Architecture
//!
//! - [`index`] - succinct structures (RRR, Elias-Fano, wavelet matrix), the
//!   FM-index built from them, and the on-disk index files
//! - [`catalog`] - copy-on-write map from file name to loaded index
//! - [`server`] - lifecycle of indices, the socket server and its client
//! - [`config`] - layered settings
//! - [`output`] - terminal formatting of query results
//!
//! ## Quick Start
//!
//! ```no_run
//! use fmsearch::index::{BuildParams, Entry, LocateMode, build_index};
//! use std::path::Path;
//!
//! let data = Path::new("/var/log/app/requests.ap");
//! let index = Path::new("/var/log/app/requests.ap.fm");
//! build_index(data, index, BuildParams::default()).unwrap();
//!
//! let entry = Entry::open(data, index).unwrap();
//! let mut offsets = Vec::new();
//! let mut skip = 0;
//! let total = entry.fm().locate(b"GET /", LocateMode::Search, 10, &mut skip, &mut offsets);
//! println!("{total} matches, first at {:?}", offsets.first());
//! ```

pub mod catalog;
pub mod config;
pub mod index;
pub mod output;
pub mod server;
pub mod utils;
