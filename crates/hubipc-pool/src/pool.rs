use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, warn};

use crate::error::{PoolError, Result};

/// Idle period after which threads above the minimum retire.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sizing for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Thread name prefix, also used in log fields.
    pub name: String,
    /// Threads kept alive while idle.
    pub min_threads: usize,
    /// Upper bound on concurrently running threads.
    pub max_threads: usize,
    /// Jobs that may wait for a free thread before submissions are rejected.
    pub max_queue: usize,
    /// How long a surplus thread waits for work before retiring.
    pub keep_alive: Duration,
}

impl PoolConfig {
    pub fn new(
        name: impl Into<String>,
        min_threads: usize,
        max_threads: usize,
        max_queue: usize,
    ) -> Self {
        Self {
            name: name.into(),
            min_threads,
            max_threads,
            max_queue,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new("hubipc-pool", 1, 4, 64)
    }
}

/// Point-in-time counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub threads: usize,
    pub active: usize,
    pub queued: usize,
    pub max_queue: usize,
    pub completed: u64,
    pub rejected: u64,
}

struct Workers {
    live: usize,
    spawned: u64,
    handles: Vec<JoinHandle<()>>,
}

struct Shared {
    config: PoolConfig,
    intake: Mutex<Option<Sender<Job>>>,
    queue: Receiver<Job>,
    workers: Mutex<Workers>,
    idle: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A bounded pool of worker threads.
///
/// Submitting never blocks: when the queue is full the job is rejected and
/// dropped. [`destroy`](Self::destroy) stops intake, lets the workers drain
/// what is already queued and joins them. Dropping the pool destroys it.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool and start its minimum number of threads.
    pub fn new(mut config: PoolConfig) -> Result<Self> {
        config.max_threads = config.max_threads.max(1);
        config.min_threads = config.min_threads.min(config.max_threads);
        config.max_queue = config.max_queue.max(1);

        let (tx, rx) = channel::bounded(config.max_queue);
        let shared = Arc::new(Shared {
            intake: Mutex::new(Some(tx)),
            queue: rx,
            workers: Mutex::new(Workers {
                live: 0,
                spawned: 0,
                handles: Vec::new(),
            }),
            idle: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            config,
        });

        {
            let mut workers = lock(&shared.workers);
            for _ in 0..shared.config.min_threads {
                spawn_worker(&shared, &mut workers)?;
            }
        }

        debug!(
            pool = %shared.config.name,
            min = shared.config.min_threads,
            max = shared.config.max_threads,
            queue = shared.config.max_queue,
            "worker pool created"
        );
        Ok(Self { shared })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Queue `job` for execution on a worker thread.
    ///
    /// On rejection the job is dropped and the error says why.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.shared;
        let intake = lock(&shared.intake);
        let Some(tx) = intake.as_ref() else {
            shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::ShutDown {
                pool: shared.config.name.clone(),
            });
        };

        match tx.try_send(Box::new(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::QueueFull {
                    pool: shared.config.name.clone(),
                    capacity: shared.config.max_queue,
                });
            }
            Err(TrySendError::Disconnected(_)) => {
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::ShutDown {
                    pool: shared.config.name.clone(),
                });
            }
        }

        // Grow while holding intake so destroy() always sees the new handle.
        let mut workers = lock(&shared.workers);
        if shared.queue.len() > shared.idle.load(Ordering::SeqCst)
            && workers.live < shared.config.max_threads
        {
            if let Err(err) = spawn_worker(shared, &mut workers) {
                // The job stays queued for the existing threads.
                warn!(pool = %shared.config.name, error = %err, "could not grow pool");
            }
        }
        Ok(())
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            threads: lock(&shared.workers).live,
            active: shared.active.load(Ordering::SeqCst),
            queued: shared.queue.len(),
            max_queue: shared.config.max_queue,
            completed: shared.completed.load(Ordering::SeqCst),
            rejected: shared.rejected.load(Ordering::Relaxed),
        }
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_shut_down(&self) -> bool {
        lock(&self.shared.intake).is_none()
    }

    /// Stop accepting work, drain the queue and join the workers.
    ///
    /// Safe to call from one of the pool's own jobs: the calling worker is
    /// not joined and exits once its current job returns. Idempotent.
    pub fn destroy(&self) {
        let shared = &self.shared;
        if lock(&shared.intake).take().is_none() {
            return;
        }

        let handles = std::mem::take(&mut lock(&shared.workers).handles);
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(pool = %shared.config.name, "worker thread panicked outside a job");
            }
        }
        debug!(pool = %shared.config.name, "worker pool destroyed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}

fn spawn_worker(shared: &Arc<Shared>, workers: &mut Workers) -> Result<()> {
    workers.handles.retain(|handle| !handle.is_finished());

    let name = format!("{}-{}", shared.config.name, workers.spawned);
    let worker_shared = Arc::clone(shared);
    // Counted idle from birth so a burst of submits does not overshoot.
    shared.idle.fetch_add(1, Ordering::SeqCst);
    let handle = match thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(&worker_shared))
    {
        Ok(handle) => handle,
        Err(err) => {
            shared.idle.fetch_sub(1, Ordering::SeqCst);
            return Err(err.into());
        }
    };

    workers.spawned += 1;
    workers.live += 1;
    workers.handles.push(handle);
    Ok(())
}

fn worker_loop(shared: &Shared) {
    loop {
        match shared.queue.recv_timeout(shared.config.keep_alive) {
            Ok(job) => {
                shared.idle.fetch_sub(1, Ordering::SeqCst);
                run_job(shared, job);
                shared.idle.fetch_add(1, Ordering::SeqCst);
            }
            Err(RecvTimeoutError::Timeout) => {
                if retire(shared) {
                    debug!(pool = %shared.config.name, "idle worker retired");
                    return;
                }
            }
            // Intake closed and queue drained.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let mut workers = lock(&shared.workers);
    workers.live -= 1;
    shared.idle.fetch_sub(1, Ordering::SeqCst);
}

fn retire(shared: &Shared) -> bool {
    let mut workers = lock(&shared.workers);
    if workers.live > shared.config.min_threads && shared.queue.is_empty() {
        workers.live -= 1;
        shared.idle.fetch_sub(1, Ordering::SeqCst);
        return true;
    }
    false
}

fn run_job(shared: &Shared, job: Job) {
    shared.active.fetch_add(1, Ordering::SeqCst);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        error!(pool = %shared.config.name, panic = message, "job panicked");
    }
    shared.active.fetch_sub(1, Ordering::SeqCst);
    shared.completed.fetch_add(1, Ordering::SeqCst);
}
