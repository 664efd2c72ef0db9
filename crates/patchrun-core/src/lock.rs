//! Per-subject run serialization.
//!
//! Each run reads the checkpoint and then writes it once per step. Two runs
//! for the same subject in one process would race on that read-modify-write,
//! so a runner given a [`SubjectLocks`] registry holds the subject's lock
//! for the whole run. Runs for different subjects never contend.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Registry of one mutex per subject.
#[derive(Debug, Default)]
pub struct SubjectLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SubjectLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `subject`, blocking until it is free.
    pub fn with_lock<R>(&self, subject: &str, f: impl FnOnce() -> R) -> R {
        let mutex = self.mutex(subject);
        let _guard = mutex.lock();
        f()
    }

    /// Run `f` under the lock for `subject` if no other run holds it.
    pub fn try_with_lock<R>(&self, subject: &str, f: impl FnOnce() -> R) -> Option<R> {
        let mutex = self.mutex(subject);
        let _guard = mutex.try_lock()?;
        Some(f())
    }

    /// Number of subjects that have been locked at least once.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no subject has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn mutex(&self, subject: &str) -> Arc<Mutex<()>> {
        // Clone out of the map so the shard lock is released before blocking.
        self.locks
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_subject_is_exclusive() {
        let locks = SubjectLocks::new();

        let nested = locks.with_lock("abc_plugin", || locks.try_with_lock("abc_plugin", || ()));
        assert!(nested.is_none());
        assert_eq!(locks.try_with_lock("abc_plugin", || 7), Some(7));
    }

    #[test]
    fn test_subjects_are_independent() {
        let locks = SubjectLocks::new();

        let nested = locks.with_lock("a", || locks.try_with_lock("b", || "ran"));
        assert_eq!(nested, Some("ran"));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_lock_serializes_threads() {
        let locks = Arc::new(SubjectLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    locks.with_lock("abc_plugin", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
