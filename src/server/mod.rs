//! Query server
//!
//! Architecture:
//! - `Lifecycle`: builds, loads and evicts per-file indices as data files change
//! - `DirectoryPoller`: notices those changes and reports them as file events
//! - `IndexServer`: accepts socket connections and answers each from one catalog snapshot
//! - `SearchClient`: sends a query and reads the response back

pub mod client;
pub mod daemon_unix;
pub mod executor;
pub mod lifecycle;
pub mod protocol;
pub mod tasks;
pub mod watcher;

pub use client::{Hit, QueryResponse, SearchClient};
pub use daemon_unix::{IndexServer, ServerHandle};
pub use executor::QueryLimits;
pub use lifecycle::Lifecycle;
pub use tasks::{TaskGuard, TaskTracker};
pub use watcher::{DirectoryPoller, FileEvents, WatcherHandle};

use std::path::{Path, PathBuf};

/// Resolve the socket path
///
/// Order: an explicit path, `$XDG_RUNTIME_DIR/fmsearch.sock`, then a per-user
/// name under `/tmp`. `FMSEARCH_SOCKET` is folded into the explicit path by
/// the configuration layer.
pub fn socket_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    // tmpfs-backed and private to the user
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("fmsearch.sock");
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/fmsearch-{}.sock", uid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_socket_wins() {
        let path = Path::new("/tmp/custom.sock");
        assert_eq!(socket_path(Some(path)), path);
    }

    #[test]
    fn test_default_socket_name() {
        let path = socket_path(None);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("fmsearch"));
        assert!(name.ends_with(".sock"));
    }
}
