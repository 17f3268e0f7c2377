//! Build, load and evict per-file indices in response to data file events.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::index::stats::data_files;
use crate::index::{BuildError, BuildOutcome, Entry, LoadError, build_index, index_path_for};
use crate::server::tasks::TaskTracker;
use crate::server::watcher::FileEvents;
use crate::utils::progress::ScanProgress;

/// The catalog as the server uses it
pub type EntryCatalog = Catalog<Arc<Entry>>;

/// Result of refreshing one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refreshed {
    /// Indexed, and loaded when serving
    Ready,
    /// Empty data files get no index
    Empty,
    /// The data file disappeared meanwhile
    Vanished,
    Failed,
}

/// Counts over one directory scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Lifecycle {
    dir: PathBuf,
    config: Arc<Config>,
    catalog: Arc<EntryCatalog>,
    tasks: TaskTracker,
    /// Load indices into the catalog after building them
    serving: bool,
    /// Names with a refresh worker running, and whether another refresh was
    /// requested meanwhile
    refreshing: Mutex<FxHashMap<String, bool>>,
}

impl Lifecycle {
    pub fn new(
        dir: impl Into<PathBuf>,
        config: Arc<Config>,
        catalog: Arc<EntryCatalog>,
        tasks: TaskTracker,
        serving: bool,
    ) -> Self {
        Self {
            dir: dir.into(),
            config,
            catalog,
            tasks,
            serving,
            refreshing: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog(&self) -> &Arc<EntryCatalog> {
        &self.catalog
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn index_path(&self, name: &str) -> PathBuf {
        index_path_for(&self.data_path(name), &self.config.index_suffix)
    }

    /// Build the index for `name` unless a valid one is already on disk
    pub fn build(&self, name: &str) -> Result<BuildOutcome, BuildError> {
        let outcome = build_index(
            &self.data_path(name),
            &self.index_path(name),
            self.config.build_params(),
        )?;
        match &outcome {
            BuildOutcome::Created {
                data_len,
                index_len,
                elapsed,
            } => info!(
                name = %name,
                data_len,
                index_len,
                elapsed_ms = elapsed.as_millis() as u64,
                "created index"
            ),
            BuildOutcome::UpToDate => debug!(name = %name, "index up to date"),
            BuildOutcome::EmptyData => debug!(name = %name, "empty data file, not indexed"),
        }
        Ok(outcome)
    }

    /// Map the index of `name` and make it visible to new requests
    pub fn load(&self, name: &str) -> Result<(), LoadError> {
        let started = Instant::now();
        let entry = Entry::open(&self.data_path(name), &self.index_path(name))?;
        let len = entry.len();
        self.catalog.insert(name, Arc::new(entry));
        info!(
            name = %name,
            data_len = len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded index"
        );
        Ok(())
    }

    /// Stop serving `name` and delete its index
    pub fn evict(&self, name: &str) {
        if self.catalog.remove(name) {
            info!(name = %name, "no longer serving");
        }
        let index = self.index_path(name);
        match fs::remove_file(&index) {
            Ok(()) => info!(index = %index.display(), "unlinked"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(index = %index.display(), "failed to unlink: {e}"),
        }
    }

    /// Build, then load when serving.
    ///
    /// The data file is checked again once the index is written and
    /// published. A deletion handled while the build ran may have unlinked
    /// the index before this refresh renamed a new one into place, so the
    /// eviction is repeated here.
    pub fn refresh(&self, name: &str) -> Refreshed {
        let outcome = self.build_and_load(name);
        match fs::metadata(self.data_path(name)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(name = %name, "data file deleted during refresh");
                self.evict(name);
                Refreshed::Vanished
            }
            _ => outcome,
        }
    }

    fn build_and_load(&self, name: &str) -> Refreshed {
        match self.build(name) {
            Ok(BuildOutcome::EmptyData) => return Refreshed::Empty,
            Ok(_) => {}
            Err(BuildError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(name = %name, "data file vanished before indexing");
                return Refreshed::Vanished;
            }
            Err(e) => {
                warn!(name = %name, "failed to build index: {e}");
                return Refreshed::Failed;
            }
        }
        if !self.serving {
            return Refreshed::Ready;
        }

        let err = match self.load(name) {
            Ok(()) => return Refreshed::Ready,
            Err(LoadError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(name = %name, "data file vanished before loading");
                return Refreshed::Vanished;
            }
            Err(e) if e.needs_rebuild() => e,
            Err(e) => {
                warn!(name = %name, "failed to load index: {e}");
                return Refreshed::Failed;
            }
        };

        // the data grew between build and load, or the body is damaged
        // behind a valid header
        info!(name = %name, "{err}, rebuilding");
        if matches!(err, LoadError::Archive(_)) {
            let index = self.index_path(name);
            if let Err(e) = fs::remove_file(&index) {
                debug!(index = %index.display(), "failed to unlink before rebuild: {e}");
            }
        }
        if let Err(e) = self.build(name) {
            warn!(name = %name, "failed to build index: {e}");
            return Refreshed::Failed;
        }
        match self.load(name) {
            Ok(()) => Refreshed::Ready,
            Err(e) => {
                warn!(name = %name, "failed to load index: {e}");
                Refreshed::Failed
            }
        }
    }

    /// Refresh `name` on a worker thread. Requests arriving while a refresh
    /// of the same name runs are folded into one more pass.
    pub fn spawn_refresh(self: &Arc<Self>, name: &str) {
        {
            let mut refreshing = self.refreshing.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(again) = refreshing.get_mut(name) {
                *again = true;
                return;
            }
            refreshing.insert(name.to_string(), false);
        }

        let guard = self.tasks.begin();
        let lifecycle = Arc::clone(self);
        let owned = name.to_string();
        let spawned = thread::Builder::new()
            .name("refresh".into())
            .spawn(move || {
                let _guard = guard;
                loop {
                    lifecycle.refresh(&owned);
                    let mut refreshing = lifecycle
                        .refreshing
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    match refreshing.get_mut(&owned) {
                        Some(again) if *again => *again = false,
                        _ => {
                            refreshing.remove(&owned);
                            break;
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(name = %name, "failed to spawn refresh worker: {e}");
            self.refreshing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(name);
        }
    }

    /// Refresh every data file in the directory, in parallel
    pub fn scan(&self, progress: &ScanProgress) -> anyhow::Result<ScanSummary> {
        let files = data_files(&self.dir, &self.config.data_suffix)?;
        let started = Instant::now();

        let outcomes: Vec<Refreshed> = files
            .par_iter()
            .map(|(name, _)| {
                let outcome = self.refresh(name);
                progress.file_done(name);
                outcome
            })
            .collect();

        let mut summary = ScanSummary {
            files: files.len(),
            ..ScanSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                Refreshed::Ready => summary.indexed += 1,
                Refreshed::Empty | Refreshed::Vanished => summary.skipped += 1,
                Refreshed::Failed => summary.failed += 1,
            }
        }

        info!(
            dir = %self.dir.display(),
            files = summary.files,
            indexed = summary.indexed,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan complete"
        );
        Ok(summary)
    }
}

impl FileEvents for Arc<Lifecycle> {
    fn notify_created(&self, name: &str) {
        debug!(name = %name, "data file created");
    }

    fn notify_modified_then_closed(&self, name: &str) {
        self.spawn_refresh(name);
    }

    fn notify_deleted(&self, name: &str) {
        self.evict(name);
    }

    fn notify_moved_in(&self, name: &str) {
        self.spawn_refresh(name);
    }

    fn notify_moved_out(&self, name: &str) {
        self.evict(name);
    }
}
