//! Polling watcher for the data directory
//!
//! Each poll lists the data files and compares `(len, mtime)` with the
//! previous poll. A file that changed is reported once it has stayed the
//! same for a full interval, which stands in for "closed after writing".

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::index::stats::data_files;

/// Receiver of data directory changes, keyed by file name
pub trait FileEvents: Send + Sync {
    fn notify_created(&self, name: &str);
    fn notify_modified_then_closed(&self, name: &str);
    fn notify_deleted(&self, name: &str);
    fn notify_moved_in(&self, name: &str);
    fn notify_moved_out(&self, name: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileState {
    len: u64,
    mtime: Option<SystemTime>,
    /// Changed since the last report
    dirty: bool,
}

pub struct DirectoryPoller {
    dir: PathBuf,
    data_suffix: String,
    files: FxHashMap<String, FileState>,
}

impl DirectoryPoller {
    pub fn new(dir: impl Into<PathBuf>, data_suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            data_suffix: data_suffix.into(),
            files: FxHashMap::default(),
        }
    }

    fn current(&self) -> anyhow::Result<Vec<(String, u64, Option<SystemTime>)>> {
        let mut current = Vec::new();
        for (name, path) in data_files(&self.dir, &self.data_suffix)? {
            // the file may vanish between listing and stat
            let Ok(meta) = fs::metadata(&path) else { continue };
            current.push((name, meta.len(), meta.modified().ok()));
        }
        Ok(current)
    }

    /// Record the present files as known and clean, without reporting them
    pub fn prime(&mut self) -> anyhow::Result<()> {
        self.files.clear();
        for (name, len, mtime) in self.current()? {
            self.files.insert(
                name,
                FileState {
                    len,
                    mtime,
                    dirty: false,
                },
            );
        }
        Ok(())
    }

    /// Compare with the previous poll and report the differences.
    ///
    /// A file that disappears in the same poll as a new file with the same
    /// length and mtime shows up is reported as moved out and moved in.
    pub fn poll_once(&mut self, events: &dyn FileEvents) -> anyhow::Result<()> {
        let current = self.current()?;
        let mut seen = FxHashSet::with_capacity_and_hasher(current.len(), Default::default());
        let mut appeared = Vec::new();

        for (name, len, mtime) in current {
            match self.files.get_mut(&name) {
                None => appeared.push((name.clone(), len, mtime)),
                Some(state) if state.len != len || state.mtime != mtime => {
                    state.len = len;
                    state.mtime = mtime;
                    state.dirty = true;
                }
                Some(state) if state.dirty => {
                    state.dirty = false;
                    events.notify_modified_then_closed(&name);
                }
                Some(_) => {}
            }
            seen.insert(name);
        }

        let mut gone: Vec<(String, FileState)> = self
            .files
            .iter()
            .filter(|(name, _)| !seen.contains(*name))
            .map(|(name, state)| (name.clone(), *state))
            .collect();
        gone.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, _) in &gone {
            self.files.remove(name);
        }

        for (name, len, mtime) in appeared {
            let renamed_from = gone
                .iter()
                .position(|(_, old)| !old.dirty && old.len == len && old.mtime == mtime);
            let dirty = match renamed_from {
                Some(i) => {
                    let (old, _) = gone.swap_remove(i);
                    events.notify_moved_out(&old);
                    events.notify_moved_in(&name);
                    false
                }
                None => {
                    events.notify_created(&name);
                    true
                }
            };
            self.files.insert(name, FileState { len, mtime, dirty });
        }

        for (name, _) in gone {
            events.notify_deleted(&name);
        }
        Ok(())
    }

    /// Poll every `interval` on a background thread until the handle drops
    pub fn spawn(
        mut self,
        events: Arc<dyn FileEvents>,
        interval: Duration,
    ) -> std::io::Result<WatcherHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let dir = self.dir.clone();
        let thread = thread::Builder::new()
            .name("dir-poller".into())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    thread::park_timeout(interval);
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = self.poll_once(events.as_ref()) {
                        warn!(dir = %self.dir.display(), "poll failed: {e:#}");
                    }
                }
                debug!(dir = %self.dir.display(), "poller stopped");
            })?;
        Ok(WatcherHandle {
            shutdown,
            thread: Some(thread),
            dir,
        })
    }
}

/// Handle to a running poller thread
pub struct WatcherHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    pub dir: PathBuf,
}

impl WatcherHandle {
    /// Signal the poller to stop and wait for it
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }

        fn push(&self, kind: &str, name: &str) {
            self.0.lock().unwrap().push(format!("{kind} {name}"));
        }
    }

    impl FileEvents for Recorder {
        fn notify_created(&self, name: &str) {
            self.push("created", name);
        }
        fn notify_modified_then_closed(&self, name: &str) {
            self.push("closed", name);
        }
        fn notify_deleted(&self, name: &str) {
            self.push("deleted", name);
        }
        fn notify_moved_in(&self, name: &str) {
            self.push("moved_in", name);
        }
        fn notify_moved_out(&self, name: &str) {
            self.push("moved_out", name);
        }
    }

    #[test]
    fn test_poll_reports_lifecycle_of_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let events = Recorder::default();
        let mut poller = DirectoryPoller::new(dir.path(), ".ap");
        poller.prime().unwrap();

        fs::write(dir.path().join("a.ap"), b"one").unwrap();
        fs::write(dir.path().join("ignored.txt"), b"x").unwrap();
        poller.poll_once(&events).unwrap();
        assert_eq!(events.take(), vec!["created a.ap"]);

        // unchanged for one interval
        poller.poll_once(&events).unwrap();
        assert_eq!(events.take(), vec!["closed a.ap"]);
        poller.poll_once(&events).unwrap();
        assert!(events.take().is_empty());

        fs::write(dir.path().join("a.ap"), b"one two").unwrap();
        poller.poll_once(&events).unwrap();
        assert!(events.take().is_empty());
        poller.poll_once(&events).unwrap();
        assert_eq!(events.take(), vec!["closed a.ap"]);

        fs::remove_file(dir.path().join("a.ap")).unwrap();
        poller.poll_once(&events).unwrap();
        assert_eq!(events.take(), vec!["deleted a.ap"]);
    }

    #[test]
    fn test_rename_is_reported_as_move() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ap"), b"payload").unwrap();
        let events = Recorder::default();
        let mut poller = DirectoryPoller::new(dir.path(), ".ap");
        poller.prime().unwrap();

        fs::rename(dir.path().join("a.ap"), dir.path().join("b.ap")).unwrap();
        poller.poll_once(&events).unwrap();
        assert_eq!(events.take(), vec!["moved_out a.ap", "moved_in b.ap"]);
        poller.poll_once(&events).unwrap();
        assert!(events.take().is_empty());
    }

    #[test]
    fn test_prime_suppresses_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.ap"), b"data").unwrap();
        let events = Recorder::default();
        let mut poller = DirectoryPoller::new(dir.path(), ".ap");
        poller.prime().unwrap();
        poller.poll_once(&events).unwrap();
        assert!(events.take().is_empty());
    }

    #[test]
    fn test_handle_stops_thread() {
        let dir = tempfile::tempdir().unwrap();
        let poller = DirectoryPoller::new(dir.path(), ".ap");
        let events: Arc<dyn FileEvents> = Arc::new(Recorder::default());
        let mut handle = poller.spawn(events, Duration::from_secs(60)).unwrap();
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
    }
}
