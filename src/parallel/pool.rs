//! Bounded worker pool with caller-executes backpressure
//!
//! Core threads are spawned up front and pull jobs from a bounded queue. When
//! the queue is full, extra threads are started up to `max_threads`; they retire
//! after `keep_alive` without work. When both the queue and the thread budget
//! are exhausted the submitting thread runs the job itself, so no work is ever
//! dropped and the queue never grows past its capacity.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{ChunkError, PoolError};

use super::handle::{package, CancelToken, Job, TaskHandle, TaskState};

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(5);
const PRUNE_THRESHOLD: usize = 1024;

/// Counters shared with the worker threads
#[derive(Debug, Default)]
struct PoolCounters {
    live_threads: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    caller_runs: AtomicU64,
    spawned: AtomicUsize,
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub pool_size: usize,
    pub core: usize,
    pub max: usize,
    pub queued: usize,
    pub queue_capacity: usize,
    pub completed: u64,
    pub caller_runs: u64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ThreadPool[Active: {}, Pool: {}, Core: {}, Max: {}, Queue: {}/{}]",
            self.active, self.pool_size, self.core, self.max, self.queued, self.queue_capacity
        )
    }
}

pub struct WorkerPool {
    config: PoolConfig,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    counters: Arc<PoolCounters>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Mutex<Vec<Arc<TaskState>>>,
    shutdown_started: AtomicBool,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl WorkerPool {
    /// Start the pool with `core_threads` long-lived workers
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let config = config.normalized();
        let (sender, receiver) = bounded(config.queue_capacity);
        let pool = Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            counters: Arc::new(PoolCounters::default()),
            threads: Mutex::new(Vec::with_capacity(config.max_threads)),
            in_flight: Mutex::new(Vec::new()),
            shutdown_started: AtomicBool::new(false),
            config,
        };

        for _ in 0..pool.config.core_threads {
            pool.counters.live_threads.fetch_add(1, Ordering::AcqRel);
            if let Err(err) = pool.spawn_worker(None, None) {
                pool.counters.live_threads.fetch_sub(1, Ordering::AcqRel);
                pool.shutdown();
                return Err(err);
            }
        }

        debug!(
            core = pool.config.core_threads,
            max = pool.config.max_threads,
            queue = pool.config.queue_capacity,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Submit work and get a handle to its result.
    ///
    /// Returns immediately unless the queue is full and every thread up to
    /// `max_threads` is busy; the work then runs on the calling thread before
    /// this returns. Fails only once the pool has been shut down.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T, ChunkError> + Send + 'static,
    {
        let sender = match lock_recover(&self.sender).as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(PoolError::Shutdown),
        };

        let (job, handle, state) = package(task);
        self.track(state);

        match sender.try_send(job) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Disconnected(_)) => Err(PoolError::Shutdown),
            Err(TrySendError::Full(job)) => {
                if let Some(job) = self.try_spawn_overflow(job) {
                    self.counters.caller_runs.fetch_add(1, Ordering::Relaxed);
                    debug!("queue full and pool saturated, running task on submitting thread");
                    job();
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(handle)
            }
        }
    }

    /// Stop accepting work, wait up to the grace period for queued and running
    /// work, then cancel whatever is left.
    ///
    /// Safe to call from several threads; only the first call runs the
    /// sequence and returns true.
    pub fn shutdown(&self) -> bool {
        if self
            .shutdown_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!("shutting down worker pool");
        // Dropping the only long-lived sender lets workers drain the queue and exit.
        lock_recover(&self.sender).take();

        let deadline = Instant::now() + self.config.shutdown_grace;
        let finished = self.await_threads(deadline);

        if !finished {
            warn!(
                grace = ?self.config.shutdown_grace,
                "worker pool did not finish within grace period, cancelling remaining work"
            );
            self.force_cancel();
        }

        let mut threads = lock_recover(&self.threads);
        for handle in threads.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_started.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.counters.active.load(Ordering::Relaxed),
            pool_size: self.counters.live_threads.load(Ordering::Relaxed),
            core: self.config.core_threads,
            max: self.config.max_threads,
            queued: self.receiver.len(),
            queue_capacity: self.config.queue_capacity,
            completed: self.counters.completed.load(Ordering::Relaxed),
            caller_runs: self.counters.caller_runs.load(Ordering::Relaxed),
        }
    }

    /// Start an extra thread for `job` if the thread budget allows; hands the
    /// job back when it does not.
    fn try_spawn_overflow(&self, job: Job) -> Option<Job> {
        let live = &self.counters.live_threads;
        let mut current = live.load(Ordering::Acquire);
        loop {
            if current >= self.config.max_threads {
                return Some(job);
            }
            match live.compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // Keep the job reachable if the spawn fails so it can still run here.
        let slot = Arc::new(Mutex::new(Some(job)));
        match self.spawn_worker(Some(Arc::clone(&slot)), Some(self.config.keep_alive)) {
            Ok(()) => None,
            Err(err) => {
                live.fetch_sub(1, Ordering::AcqRel);
                warn!(error = %err, "could not start overflow worker");
                lock_recover(&slot).take()
            }
        }
    }

    fn spawn_worker(
        &self,
        first_job: Option<Arc<Mutex<Option<Job>>>>,
        idle_timeout: Option<Duration>,
    ) -> Result<(), PoolError> {
        let receiver = self.receiver.clone();
        let counters = Arc::clone(&self.counters);
        let id = counters.spawned.fetch_add(1, Ordering::Relaxed);

        let handle = thread::Builder::new()
            .name(format!("chunkmill-worker-{}", id))
            .spawn(move || {
                if let Some(slot) = first_job {
                    let job = lock_recover(&slot).take();
                    if let Some(job) = job {
                        run_job(&counters, job);
                    }
                }
                worker_loop(receiver, &counters, idle_timeout);
                counters.live_threads.fetch_sub(1, Ordering::AcqRel);
            })?;

        lock_recover(&self.threads).push(handle);
        Ok(())
    }

    fn track(&self, state: Arc<TaskState>) {
        let mut in_flight = lock_recover(&self.in_flight);
        if in_flight.len() >= PRUNE_THRESHOLD {
            in_flight.retain(|s| !s.is_done());
        }
        in_flight.push(state);
    }

    fn await_threads(&self, deadline: Instant) -> bool {
        loop {
            let all_finished = lock_recover(&self.threads)
                .iter()
                .all(|handle| handle.is_finished());
            if all_finished {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
    }

    fn force_cancel(&self) {
        let mut dropped = 0usize;
        for job in self.receiver.try_iter() {
            drop(job);
            dropped += 1;
        }

        let in_flight = lock_recover(&self.in_flight);
        let mut cancelled = 0usize;
        for state in in_flight.iter().filter(|s| !s.is_done()) {
            state.cancel();
            cancelled += 1;
        }
        warn!(dropped, cancelled, "forced worker pool shutdown");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Job>, counters: &PoolCounters, idle_timeout: Option<Duration>) {
    match idle_timeout {
        None => {
            while let Ok(job) = receiver.recv() {
                run_job(counters, job);
            }
        }
        Some(keep_alive) => loop {
            match receiver.recv_timeout(keep_alive) {
                Ok(job) => run_job(counters, job),
                Err(RecvTimeoutError::Timeout) => {
                    debug!("idle overflow worker retiring");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        },
    }
}

fn run_job(counters: &PoolCounters, job: Job) {
    counters.active.fetch_add(1, Ordering::AcqRel);
    job();
    counters.active.fetch_sub(1, Ordering::AcqRel);
    counters.completed.fetch_add(1, Ordering::Relaxed);
}

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("mutex poisoned by a panicked thread, recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crossbeam_channel::unbounded;
    use std::sync::Barrier;

    fn config(core: usize, queue: usize) -> PoolConfig {
        PoolConfig {
            core_threads: core,
            max_threads: core * 2,
            queue_capacity: queue,
            keep_alive: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_submit_and_wait() {
        let pool = WorkerPool::new(config(2, 8)).unwrap();
        let mut handles: Vec<_> = (0..10)
            .map(|i| pool.submit(move |_| Ok(i * 2)).unwrap())
            .collect();
        let results: Vec<i32> = handles
            .iter_mut()
            .map(|h| h.wait_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(pool.stats().core, 2);
        assert_eq!(pool.stats().max, 4);
    }

    #[test]
    fn test_caller_runs_when_saturated() {
        // one core thread, one overflow thread, queue of one
        let pool = WorkerPool::new(PoolConfig {
            core_threads: 1,
            max_threads: 2,
            queue_capacity: 1,
            keep_alive: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        })
        .unwrap();

        let (release_tx, release_rx) = unbounded::<()>();
        let blocker = move |rx: Receiver<()>| {
            move |_: &CancelToken| {
                let _ = rx.recv();
                Ok::<_, ChunkError>(thread::current().name().map(str::to_string))
            }
        };

        // occupies the core thread
        let mut first = pool.submit(blocker(release_rx.clone())).unwrap();
        // wait until the core thread picked it up so the queue is empty again
        let start = Instant::now();
        while pool.stats().active == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        // fills the queue
        let mut queued = pool.submit(blocker(release_rx.clone())).unwrap();
        // queue full: spawns the overflow thread
        let mut overflow = pool.submit(blocker(release_rx.clone())).unwrap();
        assert_eq!(pool.stats().pool_size, 2);

        // queue full and at max threads: runs right here
        let mut inline = pool
            .submit(|_| Ok(thread::current().name().map(str::to_string)))
            .unwrap();
        assert!(inline.is_done());
        assert_eq!(pool.stats().caller_runs, 1);
        let caller_name = thread::current().name().map(str::to_string);
        assert_eq!(
            inline.wait_timeout(Duration::from_secs(1)).unwrap(),
            caller_name
        );

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        for handle in [&mut first, &mut queued, &mut overflow] {
            let name = handle.wait_timeout(Duration::from_secs(5)).unwrap();
            assert!(name.unwrap().starts_with("chunkmill-worker-"));
        }
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(config(1, 4)).unwrap();
        assert!(pool.shutdown());
        assert!(pool.is_shutdown());
        let result = pool.submit(|_| Ok(()));
        assert!(matches!(result, Err(PoolError::Shutdown)));
    }

    #[test]
    fn test_shutdown_waits_for_queued_work() {
        let pool = WorkerPool::new(config(1, 16)).unwrap();
        let mut handles: Vec<_> = (0..5)
            .map(|i| {
                pool.submit(move |_| {
                    thread::sleep(Duration::from_millis(5));
                    Ok(i)
                })
                .unwrap()
            })
            .collect();
        pool.shutdown();
        for (i, handle) in handles.iter_mut().enumerate() {
            assert_eq!(handle.wait_timeout(Duration::from_millis(10)).unwrap(), i);
        }
    }

    #[test]
    fn test_concurrent_shutdown_runs_once() {
        let pool = Arc::new(WorkerPool::new(config(2, 4)).unwrap());
        let barrier = Arc::new(Barrier::new(4));
        let callers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    pool.shutdown()
                })
            })
            .collect();
        let ran: usize = callers
            .into_iter()
            .map(|c| c.join().unwrap() as usize)
            .sum();
        assert_eq!(ran, 1);
        assert!(!pool.shutdown());
    }

    #[test]
    fn test_forced_shutdown_cancels_remaining_work() {
        let pool = WorkerPool::new(PoolConfig {
            core_threads: 1,
            max_threads: 1,
            queue_capacity: 4,
            keep_alive: Duration::from_millis(50),
            shutdown_grace: Duration::from_millis(50),
        })
        .unwrap();

        let mut running = pool
            .submit(|token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                Err::<(), _>(ChunkError::new(
                    "chunk-1",
                    crate::error::ChunkErrorKind::Cancelled,
                ))
            })
            .unwrap();
        let mut queued = pool.submit(|_| Ok(())).unwrap();

        let start = Instant::now();
        while pool.stats().active == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(pool.shutdown());
        assert!(matches!(
            queued.wait_timeout(Duration::from_secs(1)),
            Err(TaskError::Cancelled) | Err(TaskError::Disconnected)
        ));
        match running.wait_timeout(Duration::from_secs(5)) {
            Err(TaskError::Failed(err)) => assert!(err.is_cancelled()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let pool = WorkerPool::new(config(1, 4)).unwrap();
        let mut bad = pool
            .submit(|_| -> Result<(), ChunkError> { panic!("boom") })
            .unwrap();
        assert!(matches!(
            bad.wait_timeout(Duration::from_secs(5)),
            Err(TaskError::Panicked(_))
        ));
        let mut good = pool.submit(|_| Ok(7)).unwrap();
        assert_eq!(good.wait_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_stats_display() {
        let stats = PoolStats {
            active: 1,
            pool_size: 4,
            core: 4,
            max: 8,
            queued: 3,
            queue_capacity: 100,
            completed: 10,
            caller_runs: 0,
        };
        assert_eq!(
            stats.to_string(),
            "ThreadPool[Active: 1, Pool: 4, Core: 4, Max: 8, Queue: 3/100]"
        );
    }
}
