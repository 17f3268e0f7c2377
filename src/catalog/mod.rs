//! Copy-on-write catalog of loaded indices.
//!
//! The catalog holds the current treap root behind a mutex. Readers clone
//! the root, an O(1) reference count bump, and then query it without any
//! lock; later inserts and removals build new roots and never touch nodes a
//! snapshot can reach.
//!
//! Superseded roots are not dropped by the writer. They are queued and a
//! cleaner thread drops them outside the lock, so reclaiming entries (and
//! unmapping their files) never happens on a request or build thread while
//! it holds the catalog mutex.

pub mod treap;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::debug;

pub use treap::Treap;

/// A frozen view of the catalog
pub type Snapshot<V> = Treap<String, V>;

struct State<V> {
    current: Snapshot<V>,
    retired: Vec<Snapshot<V>>,
    generation: u64,
    shutdown: bool,
}

pub struct Catalog<V> {
    state: Mutex<State<V>>,
    signal: Condvar,
}

impl<V: Clone> Default for Catalog<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Catalog<V> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                current: Treap::new(),
                retired: Vec::new(),
                generation: 0,
                shutdown: false,
            }),
            signal: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<V>> {
        // state stays consistent even if a holder panicked: every update is a
        // single assignment
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current root, valid for as long as the caller keeps it
    pub fn snapshot(&self) -> Snapshot<V> {
        self.lock().current.clone()
    }

    /// Make `value` the entry for `name`, superseding any previous one
    pub fn insert(&self, name: impl Into<String>, value: V) {
        let mut state = self.lock();
        let next = state.current.insert(name.into(), value);
        self.swap(&mut state, next);
    }

    /// Drop the entry for `name`. Returns whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        let mut state = self.lock();
        match state.current.remove(name) {
            Some(next) => {
                self.swap(&mut state, next);
                true
            }
            None => false,
        }
    }

    fn swap(&self, state: &mut State<V>, next: Snapshot<V>) {
        let old = std::mem::replace(&mut state.current, next);
        state.retired.push(old);
        state.generation += 1;
        self.signal.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of mutations applied so far
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Number of superseded roots waiting for the cleaner
    pub fn pending_release(&self) -> usize {
        self.lock().retired.len()
    }

    /// Release retired roots as they arrive until [`Catalog::shutdown`].
    /// Returns the number of roots released.
    pub fn run_cleaner(&self) -> usize {
        let mut released = 0;
        loop {
            let (batch, done) = {
                let mut state = self.lock();
                while state.retired.is_empty() && !state.shutdown {
                    state = self
                        .signal
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                (std::mem::take(&mut state.retired), state.shutdown)
            };
            released += batch.len();
            if !batch.is_empty() {
                debug!(roots = batch.len(), "releasing superseded catalog roots");
            }
            // entries only referenced by these roots are unmapped here
            drop(batch);
            if done {
                return released;
            }
        }
    }

    /// Stop the cleaner once it has drained the queue
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.signal.notify_all();
    }
}

impl<V: Clone + Send + Sync + 'static> Catalog<V> {
    pub fn spawn_cleaner(self: &Arc<Self>) -> std::io::Result<JoinHandle<usize>> {
        let catalog = Arc::clone(self);
        thread::Builder::new()
            .name("catalog-cleaner".into())
            .spawn(move || catalog.run_cleaner())
    }
}
