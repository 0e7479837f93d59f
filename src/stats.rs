//! Operation counters for the world pipeline.
//!
//! Counters are cheap relaxed atomics bumped from any thread; snapshots are
//! advisory and used for logging, tests and progress reporting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// Counters for one kind of pipeline operation.
#[derive(Debug, Default)]
pub struct OpStats {
    pub requests: AtomicU64,
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub aborted: AtomicU64,
    pub failed: AtomicU64,
}

impl OpStats {
    pub fn snapshot(&self) -> OpStatsSnapshot {
        OpStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of an [`OpStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpStatsSnapshot {
    pub requests: u64,
    pub started: u64,
    pub completed: u64,
    pub aborted: u64,
    pub failed: u64,
}

/// World pipeline counters, grouped by operation kind.
#[derive(Debug, Default)]
pub struct WorldStats {
    pub load: OpStats,
    pub save: OpStats,
    pub gen: OpStats,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Tracks outstanding load operations, for progress reporting and for
/// blocking until the loader quiesces.
#[derive(Debug, Default)]
pub struct LoadTracker {
    outstanding: AtomicUsize,
    lock: Mutex<()>,
    idle: Condvar,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a load operation.
    pub fn start_op(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Records the end of a load operation, waking idle waiters when it was
    /// the last one.
    pub fn end_op(&self) {
        let prev = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced LoadTracker::end_op");
        if prev == 1 {
            let _guard = self.lock.lock();
            self.idle.notify_all();
        }
    }

    /// Number of loads currently in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Blocks until no loads are in flight.
    pub fn wait_until_idle(&self) {
        let mut guard = self.lock.lock();
        while self.outstanding() > 0 {
            self.idle.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_snapshot() {
        let stats = WorldStats::default();
        bump(&stats.load.requests);
        bump(&stats.load.requests);
        bump(&stats.load.completed);
        let snap = stats.load.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 0);
    }

    #[test]
    fn tracker_blocks_until_ops_drain() {
        let tracker = Arc::new(LoadTracker::new());
        tracker.start_op();
        tracker.start_op();
        assert_eq!(tracker.outstanding(), 2);

        let t = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                tracker.end_op();
                tracker.end_op();
            })
        };
        tracker.wait_until_idle();
        assert_eq!(tracker.outstanding(), 0);
        t.join().expect("worker thread panicked");
    }
}
