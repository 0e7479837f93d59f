//! Shared worker pool for background world work.
//!
//! The loader and generator both submit onto this pool. Submission is FIFO
//! through an unbounded queue; workers scale between a core count and a
//! maximum, idle workers above the core count retire after a keep-alive,
//! and shutdown refuses new work, then drains what is in flight.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sizing and timing for the pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Workers kept alive even when idle.
    pub core_threads: usize,
    /// Upper bound on concurrently live workers.
    pub max_threads: usize,
    /// How long a worker above the core count lingers without work.
    pub keep_alive: Duration,
    /// How long shutdown waits for in-flight work before giving up.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_threads: 2,
            max_threads: num_cpus::get().max(2),
            keep_alive: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

struct PoolState {
    sender: Option<Sender<Job>>,
    spawned: usize,
    idle: usize,
    next_worker: usize,
    shutdown: bool,
}

struct Inner {
    config: SchedulerConfig,
    receiver: Receiver<Job>,
    state: Mutex<PoolState>,
    cond: Condvar,
}

/// Handle to the shared worker pool. Cloning shares the same pool.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(Inner {
                config,
                receiver,
                state: Mutex::new(PoolState {
                    sender: Some(sender),
                    spawned: 0,
                    idle: 0,
                    next_worker: 0,
                    shutdown: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Submits a job. A shut-down pool rejects the submission and hands the
    /// job back so the caller can run or discard it.
    pub fn execute<F>(&self, job: F) -> Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        let sender = match (state.shutdown, state.sender.as_ref()) {
            (false, Some(s)) => s,
            _ => {
                log::warn!("job submitted after scheduler shutdown; rejecting");
                return Err(job);
            }
        };
        if sender.send(Box::new(job)).is_err() {
            // Only reachable if the queue disconnected, which shutdown()
            // alone does while holding the lock.
            log::error!("scheduler queue disconnected; job dropped");
            return Ok(());
        }
        // Grow when nobody is idle to pick the job up.
        if state.idle == 0 && state.spawned < self.inner.config.max_threads {
            let id = state.next_worker;
            state.next_worker += 1;
            state.spawned += 1;
            self.spawn_worker(id, &mut state);
        }
        Ok(())
    }

    fn spawn_worker(&self, id: usize, state: &mut PoolState) {
        let inner = self.inner.clone();
        let spawn_result = std::thread::Builder::new()
            .name(format!("world-worker-{}", id))
            .spawn(move || worker_loop(&inner));
        if let Err(e) = spawn_result {
            log::error!("failed to spawn world worker: {}", e);
            state.spawned -= 1;
        }
    }

    /// Number of jobs queued and not yet picked up.
    pub fn queued(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Shuts the pool down: refuses new submissions, lets queued and
    /// in-flight jobs finish, and waits up to the configured grace period.
    /// Returns `true` when the pool drained in time.
    pub fn shutdown(&self) -> bool {
        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return state.spawned == 0;
        }
        state.shutdown = true;
        // Dropping the sender disconnects the queue once drained, which
        // retires every worker.
        state.sender = None;

        while state.spawned > 0 {
            if Instant::now() >= deadline {
                log::warn!(
                    "scheduler failed to drain within {:?}; {} workers still busy",
                    self.inner.config.shutdown_grace,
                    state.spawned
                );
                return false;
            }
            self.inner.cond.wait_until(&mut state, deadline);
        }
        true
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        {
            let mut state = inner.state.lock();
            state.idle += 1;
        }
        let received = inner.receiver.recv_timeout(inner.config.keep_alive);
        {
            let mut state = inner.state.lock();
            state.idle -= 1;
            match &received {
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {
                    // Retire surplus workers; core workers keep waiting.
                    if state.spawned > inner.config.core_threads || state.shutdown {
                        state.spawned -= 1;
                        inner.cond.notify_all();
                        return;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    state.spawned -= 1;
                    inner.cond.notify_all();
                    return;
                }
            }
        }
        if let Ok(job) = received {
            // A panicking job must not take its worker (or the process)
            // down with it.
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                log::error!(
                    "world worker '{}' caught a panicking job",
                    std::thread::current().name().unwrap_or("?")
                );
            }
            inner.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn small_pool() -> Scheduler {
        Scheduler::new(SchedulerConfig {
            core_threads: 1,
            max_threads: 1,
            keep_alive: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(10),
        })
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let pool = small_pool();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let order = order.clone();
            assert!(pool.execute(move || order.lock().push(i)).is_ok());
        }
        assert!(pool.shutdown());
        let order = order.lock();
        assert_eq!(*order, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_refuses_new_work() {
        let pool = small_pool();
        assert!(pool.shutdown());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        assert!(pool
            .execute(move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            })
            .is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_drains_in_flight_work() {
        let pool = Scheduler::new(SchedulerConfig {
            core_threads: 2,
            max_threads: 4,
            keep_alive: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        });
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let done = done.clone();
            pool.execute(move || {
                std::thread::sleep(Duration::from_millis(2));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_or_else(|_| panic!("pool accepts work before shutdown"));
        }
        assert!(pool.shutdown());
        assert_eq!(done.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn panicking_job_does_not_kill_the_pool() {
        let pool = small_pool();
        pool.execute(|| panic!("boom"))
            .unwrap_or_else(|_| panic!("pool accepts work before shutdown"));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        pool.execute(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_or_else(|_| panic!("pool accepts work before shutdown"));
        assert!(pool.shutdown());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn surplus_workers_retire_after_keep_alive() {
        let pool = Scheduler::new(SchedulerConfig {
            core_threads: 1,
            max_threads: 4,
            keep_alive: Duration::from_millis(20),
            shutdown_grace: Duration::from_secs(10),
        });
        for _ in 0..8 {
            pool.execute(|| std::thread::sleep(Duration::from_millis(5)))
                .unwrap_or_else(|_| panic!("pool accepts work before shutdown"));
        }
        std::thread::sleep(Duration::from_millis(300));
        let state = pool.inner.state.lock();
        assert!(state.spawned <= 1, "expected surplus workers to retire");
    }
}
