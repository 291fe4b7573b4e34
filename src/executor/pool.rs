//! Fixed-size worker pool.
//!
//! Workers pull from one shared FIFO injector, spin/yield/park when idle, and
//! catch panics escaping a task: those are counted and routed to the worker's
//! own failure handler (or logged). That is the pool's failure channel.

use super::task::Task;
use super::ExecutorService;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::failure::{self, TaskFailure};
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type WorkerId = usize;

struct PoolState {
    shutdown: bool,
    live_workers: usize,
}

struct PoolInner {
    injector: Injector<Task>,
    // Mirrors `state.shutdown` for the worker fast path.
    shutdown: AtomicBool,
    state: Mutex<PoolState>,
    terminated: Condvar,
    pending_tasks: AtomicUsize,
    completed_tasks: AtomicU64,
    panicked_tasks: AtomicU64,
}

impl PoolInner {
    fn pop(&self) -> Option<Task> {
        loop {
            match self.injector.steal() {
                Steal::Success(task) => {
                    self.pending_tasks.fetch_sub(1, Ordering::Relaxed);
                    return Some(task);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn begin_shutdown(&self) -> bool {
        let mut state = self.state.lock();
        let first = !state.shutdown;
        state.shutdown = true;
        self.shutdown.store(true, Ordering::Release);
        if state.live_workers == 0 {
            self.terminated.notify_all();
        }
        first
    }
}

struct WorkerHandle {
    id: WorkerId,
    thread: Mutex<Option<JoinHandle<()>>>,
    unparker: thread::Thread,
}

pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Vec<WorkerHandle>,
    next_wake: AtomicUsize,
}

impl ThreadPool {
    pub fn new(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let num_threads = config.worker_threads();

        let inner = Arc::new(PoolInner {
            injector: Injector::new(),
            shutdown: AtomicBool::new(false),
            state: Mutex::new(PoolState {
                shutdown: false,
                live_workers: num_threads,
            }),
            terminated: Condvar::new(),
            pending_tasks: AtomicUsize::new(0),
            completed_tasks: AtomicU64::new(0),
            panicked_tasks: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(num_threads);

        for id in 0..num_threads {
            let name = format!("{}-{}", config.thread_name_prefix, id);
            let mut builder = thread::Builder::new().name(name);
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let worker = Worker {
                id,
                inner: inner.clone(),
            };
            let handler = config.failure_handler.clone();

            let spawned = builder.spawn(move || {
                failure::set_thread_handler(handler);
                worker.run();
            });

            match spawned {
                Ok(thread) => workers.push(WorkerHandle {
                    id,
                    unparker: thread.thread().clone(),
                    thread: Mutex::new(Some(thread)),
                }),
                Err(e) => {
                    // Workers that were never spawned can't check out.
                    inner.state.lock().live_workers -= num_threads - id;
                    let partial = Self {
                        inner,
                        workers,
                        next_wake: AtomicUsize::new(0),
                    };
                    drop(partial);
                    tracing::error!(worker = id, error = %e, "failed to spawn worker thread");
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(Self {
            inner,
            workers,
            next_wake: AtomicUsize::new(0),
        })
    }

    /// Pool with `n` workers and otherwise default settings.
    pub fn with_threads(n: usize) -> Result<Self> {
        let config = PoolConfig::builder().num_threads(n).build()?;
        Self::new(&config)
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Tasks accepted but not yet started.
    pub fn pending_tasks(&self) -> usize {
        self.inner.pending_tasks.load(Ordering::Relaxed)
    }

    /// Tasks that ran to completion, including panicked ones.
    pub fn completed_tasks(&self) -> u64 {
        self.inner.completed_tasks.load(Ordering::Acquire)
    }

    /// Panics that reached the pool's own failure channel.
    pub fn panicked_tasks(&self) -> u64 {
        self.inner.panicked_tasks.load(Ordering::Acquire)
    }

    fn wake_one(&self) {
        if self.workers.is_empty() {
            return;
        }
        let idx = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[idx].unparker.unpark();
    }

    fn wake_all(&self) {
        for worker in &self.workers {
            worker.unparker.unpark();
        }
    }
}

impl ExecutorService for ThreadPool {
    fn execute(&self, task: Task) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if state.shutdown {
                return Err(Error::rejected(format!(
                    "pool is shut down, task {}",
                    task.id()
                )));
            }
            self.inner.pending_tasks.fetch_add(1, Ordering::Relaxed);
            self.inner.injector.push(task);
        }

        self.wake_one();
        Ok(())
    }

    fn shutdown(&self) {
        if self.inner.begin_shutdown() {
            tracing::debug!(workers = self.workers.len(), "thread pool shutting down");
        }
        self.wake_all();
    }

    fn shutdown_now(&self) -> Vec<Task> {
        self.shutdown();

        let mut unstarted = Vec::new();
        while let Some(task) = self.inner.pop() {
            unstarted.push(task);
        }
        unstarted
    }

    fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        let state = self.inner.state.lock();
        state.shutdown && state.live_workers == 0
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !(state.shutdown && state.live_workers == 0) {
            if self
                .inner
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.shutdown && state.live_workers == 0;
            }
        }
        true
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.workers.len())
            .field("pending_tasks", &self.pending_tasks())
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();

        let current = thread::current().id();
        for worker in &self.workers {
            // A worker can drop the last reference to its own pool.
            if worker.unparker.id() == current {
                continue;
            }
            if let Some(thread) = worker.thread.lock().take() {
                if thread.join().is_err() {
                    tracing::warn!(worker = worker.id, "worker thread panicked");
                }
            }
        }
    }
}

struct Worker {
    id: WorkerId,
    inner: Arc<PoolInner>,
}

/// Checks the worker out of the live count on every exit path.
struct CheckOut<'a>(&'a PoolInner);

impl Drop for CheckOut<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.live_workers -= 1;
        if state.live_workers == 0 {
            self.0.terminated.notify_all();
        }
    }
}

impl Worker {
    fn run(&self) {
        let _check_out = CheckOut(&self.inner);
        tracing::debug!(worker = self.id, "worker started");

        let mut backoff_cnt = 0;
        loop {
            if let Some(task) = self.inner.pop() {
                backoff_cnt = 0;
                self.execute_task(task);
                continue;
            }

            // Intake is closed before the flag is set, so an empty queue
            // observed after it is final.
            if self.inner.shutdown.load(Ordering::Acquire) {
                match self.inner.pop() {
                    Some(task) => self.execute_task(task),
                    None => break,
                }
                continue;
            }

            self.backoff(&mut backoff_cnt);
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }

    fn execute_task(&self, task: Task) {
        let tid = task.id().as_u64();
        tracing::trace!(
            worker = self.id,
            task = tid,
            queued_us = task.submit_time().elapsed().as_micros() as u64,
            "running task"
        );

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
            self.inner.panicked_tasks.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(worker = self.id, task = tid, "task panicked");

            let failure = TaskFailure::from_payload(payload);
            let handler = failure::resolve_handler(None);
            let current = thread::current();
            if let Err(secondary) =
                catch_unwind(AssertUnwindSafe(|| handler.uncaught_failure(&current, failure)))
            {
                tracing::error!(
                    worker = self.id,
                    task = tid,
                    "failure handler panicked: {}",
                    TaskFailure::from_payload(secondary).message()
                );
            }
        }

        self.inner.completed_tasks.fetch_add(1, Ordering::AcqRel);
    }

    fn backoff(&self, count: &mut u32) {
        const MAX_SPINS: u32 = 10;
        const MAX_YIELDS: u32 = 20;

        *count += 1;

        if *count <= MAX_SPINS {
            let spins = (*count).min(6);
            for _ in 0..(1 << spins) {
                std::hint::spin_loop();
            }
        } else if *count <= MAX_YIELDS {
            thread::yield_now();
        } else {
            thread::park_timeout(Duration::from_micros(100));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::UncaughtFailureHandler;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_pool_runs_tasks() {
        let pool = ThreadPool::with_threads(2).unwrap();
        let (tx, rx) = unbounded();

        for i in 0..10 {
            let tx = tx.clone();
            pool.spawn(move || tx.send(i).unwrap()).unwrap();
        }

        let mut got: Vec<i32> = (0..10).map(|_| rx.recv().unwrap()).collect();
        got.sort();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_names_use_prefix() {
        let config = PoolConfig::builder()
            .num_threads(1)
            .thread_name_prefix("unit")
            .build()
            .unwrap();
        let pool = ThreadPool::new(&config).unwrap();
        let (tx, rx) = unbounded();

        pool.spawn(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        })
        .unwrap();

        assert_eq!(rx.recv().unwrap().as_deref(), Some("unit-0"));
    }

    #[test]
    fn test_execute_after_shutdown_is_rejected() {
        let pool = ThreadPool::with_threads(1).unwrap();
        pool.shutdown();

        let err = pool.spawn(|| {}).unwrap_err();
        assert!(err.is_rejected());
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert!(pool.is_terminated());
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let pool = ThreadPool::with_threads(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(pool.completed_tasks(), 50);
    }

    #[test]
    fn test_shutdown_now_returns_unstarted_tasks() {
        let pool = ThreadPool::with_threads(1).unwrap();
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();

        pool.spawn(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv().unwrap();

        for _ in 0..3 {
            pool.spawn(|| panic!("must not run")).unwrap();
        }

        let unstarted = pool.shutdown_now();
        assert_eq!(unstarted.len(), 3);
        assert!(pool.is_shutdown());

        release_tx.send(()).unwrap();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.panicked_tasks(), 0);
    }

    #[test]
    fn test_await_termination_times_out_while_running() {
        let pool = ThreadPool::with_threads(1).unwrap();
        assert!(!pool.await_termination(Duration::from_millis(20)));
        assert!(!pool.is_terminated());
    }

    #[test]
    fn test_panicking_worker_handler_does_not_strand_queue() {
        let handler: Arc<dyn UncaughtFailureHandler> =
            Arc::new(|_: &thread::Thread, _: TaskFailure| panic!("handler failed"));
        let config = PoolConfig::builder()
            .num_threads(1)
            .failure_handler(handler)
            .build()
            .unwrap();
        let pool = ThreadPool::new(&config).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.spawn(|| panic!("first")).unwrap();
        for _ in 0..5 {
            let ran = ran.clone();
            pool.spawn(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 5);
        assert_eq!(pool.pending_tasks(), 0);
        assert_eq!(pool.panicked_tasks(), 1);
        assert_eq!(pool.completed_tasks(), 6);
    }

    #[test]
    fn test_panics_reach_worker_handler() {
        let (tx, rx) = unbounded();
        let handler: Arc<dyn UncaughtFailureHandler> =
            Arc::new(move |thread: &thread::Thread, failure: TaskFailure| {
                tx.send((thread.name().map(str::to_owned), failure.message().to_string()))
                    .unwrap();
            });
        let config = PoolConfig::builder()
            .num_threads(1)
            .thread_name_prefix("failing")
            .failure_handler(handler)
            .build()
            .unwrap();
        let pool = ThreadPool::new(&config).unwrap();

        pool.spawn(|| panic!("kaboom")).unwrap();

        let (name, message) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("failing-0"));
        assert_eq!(message, "kaboom");

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(pool.panicked_tasks(), 1);
    }
}
