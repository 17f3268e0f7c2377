//! Counting in-flight worker threads so shutdown can wait for them.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    ongoing: Mutex<usize>,
    idle: Condvar,
}

/// Shared counter of ongoing operations
#[derive(Clone, Default)]
pub struct TaskTracker {
    inner: Arc<Inner>,
}

/// Held by a worker for as long as its operation runs
#[must_use = "the task ends when the guard drops"]
pub struct TaskGuard {
    inner: Arc<Inner>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> TaskGuard {
        *self.inner.ongoing.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        TaskGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn ongoing(&self) -> usize {
        *self.inner.ongoing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until no operation is running
    pub fn wait_idle(&self) {
        let mut ongoing = self.inner.ongoing.lock().unwrap_or_else(PoisonError::into_inner);
        while *ongoing > 0 {
            ongoing = self
                .inner
                .idle
                .wait(ongoing)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`TaskTracker::wait_idle`] with a deadline. Returns whether the
    /// tracker went idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let ongoing = self.inner.ongoing.lock().unwrap_or_else(PoisonError::into_inner);
        let (ongoing, _) = self
            .inner
            .idle
            .wait_timeout_while(ongoing, timeout, |n| *n > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *ongoing == 0
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut ongoing = self.inner.ongoing.lock().unwrap_or_else(PoisonError::into_inner);
        *ongoing -= 1;
        if *ongoing == 0 {
            self.inner.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_idle_waits_for_workers() {
        let tracker = TaskTracker::new();
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let guard = tracker.begin();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10 * i));
                    drop(guard);
                })
            })
            .collect();
        tracker.wait_idle();
        assert_eq!(tracker.ongoing(), 0);
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_wait_idle_timeout() {
        let tracker = TaskTracker::new();
        let guard = tracker.begin();
        assert!(!tracker.wait_idle_timeout(Duration::from_millis(20)));
        drop(guard);
        assert!(tracker.wait_idle_timeout(Duration::from_millis(20)));
    }
}
