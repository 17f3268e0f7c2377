//! Unix socket query server
//!
//! Keeps every valid index mapped and answers queries over a Unix socket.
//! Each connection is served on its own thread from the catalog snapshot
//! taken when its request arrived.

use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::server::executor::{QueryLimits, execute};
use crate::server::lifecycle::{EntryCatalog, Lifecycle};
use crate::server::protocol::{MAX_REQUEST_LEN, ProtocolError, parse_request};
use crate::server::tasks::TaskTracker;
use crate::server::watcher::{DirectoryPoller, FileEvents};
use crate::utils::progress::ScanProgress;

/// Stops a running [`IndexServer`] from another thread
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    socket_path: PathBuf,
}

impl ServerHandle {
    /// Ask the accept loop to finish. In-flight requests still complete.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // wake the accept loop
        let _ = UnixStream::connect(&self.socket_path);
    }
}

/// Server statistics
#[derive(Default)]
struct ServerStats {
    connections: AtomicU64,
    answered: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
}

/// The query server
pub struct IndexServer {
    config: Arc<Config>,
    dir: PathBuf,
    socket_path: PathBuf,
    catalog: Arc<EntryCatalog>,
    tasks: TaskTracker,
    lifecycle: Arc<Lifecycle>,
    limits: QueryLimits,
    stats: ServerStats,
    shutdown: Arc<AtomicBool>,
}

impl IndexServer {
    /// A server for the data files in `dir`, listening on `socket_path`
    pub fn new(config: Arc<Config>, dir: impl Into<PathBuf>, socket_path: impl Into<PathBuf>) -> Arc<Self> {
        let dir = dir.into();
        let catalog = Arc::new(Catalog::new());
        let tasks = TaskTracker::new();
        let lifecycle = Arc::new(Lifecycle::new(
            dir.clone(),
            Arc::clone(&config),
            Arc::clone(&catalog),
            tasks.clone(),
            true,
        ));
        Arc::new(Self {
            limits: config.query_limits(),
            config,
            dir,
            socket_path: socket_path.into(),
            catalog,
            tasks,
            lifecycle,
            stats: ServerStats::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
            socket_path: self.socket_path.clone(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn catalog(&self) -> &Arc<EntryCatalog> {
        &self.catalog
    }

    fn bind(&self) -> Result<UnixListener> {
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Remove stale socket file
        match fs::remove_file(&self.socket_path) {
            Ok(()) => debug!(socket = %self.socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", self.socket_path.display()));
            }
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {}", self.socket_path.display()))?;
        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))?;
        Ok(listener)
    }

    /// Start serving (blocking) until the request count is reached or the
    /// server is stopped through a [`ServerHandle`]
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let listener = self.bind()?;
        let cleaner = self.catalog.spawn_cleaner()?;

        let mut poller = DirectoryPoller::new(&self.dir, self.config.data_suffix.clone());
        poller.prime()?;
        let events: Arc<dyn FileEvents> = Arc::new(Arc::clone(&self.lifecycle));
        let watcher = poller.spawn(events, self.config.poll_interval())?;
        // clients connecting meanwhile wait in the listen backlog
        if let Err(e) = self.lifecycle.scan(&ScanProgress::hidden()) {
            warn!(dir = %self.dir.display(), "initial scan failed: {e:#}");
        }

        info!(
            socket = %self.socket_path.display(),
            dir = %self.dir.display(),
            "listening"
        );

        let served = self.accept_loop(&listener);

        drop(watcher);
        drop(listener);
        let _ = fs::remove_file(&self.socket_path);
        self.tasks.wait_idle();
        self.catalog.shutdown();
        let released = cleaner.join().unwrap_or(0);

        info!(
            connections = served,
            answered = self.stats.answered.load(Ordering::Relaxed),
            rejected = self.stats.rejected.load(Ordering::Relaxed),
            timed_out = self.stats.timed_out.load(Ordering::Relaxed),
            released,
            "server stopped"
        );
        Ok(())
    }

    fn accept_loop(self: &Arc<Self>, listener: &UnixListener) -> u64 {
        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let served = self.stats.connections.fetch_add(1, Ordering::Relaxed) + 1;
                    let guard = self.tasks.begin();
                    let server = Arc::clone(self);
                    let spawned = thread::Builder::new().name("request".into()).spawn(move || {
                        let _guard = guard;
                        server.serve_connection(stream);
                    });
                    if let Err(e) = spawned {
                        warn!("failed to spawn request worker: {e}");
                    }
                    if self.config.request_count.is_some_and(|limit| served >= limit) {
                        break;
                    }
                }
                Err(e) => warn!("accept error: {e}"),
            }
        }
        self.stats.connections.load(Ordering::Relaxed)
    }

    fn serve_connection(&self, stream: UnixStream) {
        match self.answer(stream) {
            Ok(total) => {
                self.stats.answered.fetch_add(1, Ordering::Relaxed);
                debug!(total, "request answered");
            }
            Err(ConnectionError::Protocol(e)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("dropping request: {e}");
            }
            Err(ConnectionError::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                debug!("request timed out");
            }
            Err(ConnectionError::Io(e)) => debug!("connection error: {e}"),
        }
    }

    /// Read one request, answer it and close the connection
    fn answer(&self, stream: UnixStream) -> Result<u32, ConnectionError> {
        stream.set_read_timeout(Some(self.config.request_timeout()))?;
        stream.set_write_timeout(Some(self.config.request_timeout()))?;

        let mut request = Vec::new();
        (&stream)
            .take(MAX_REQUEST_LEN as u64 + 1)
            .read_to_end(&mut request)?;
        let query = parse_request(&request)?;

        let snapshot = self.catalog.snapshot();
        let mut out = BufWriter::new(&stream);
        let total = execute(&snapshot, &query, &self.limits, &mut out)?;
        out.flush()?;
        Ok(total)
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
