//! Background pool for preload jobs (interpolation off the tick thread)
//!
//! Work-stealing deques:
//! - New jobs go to the global injector, which workers check first
//! - Idle workers steal from each other's deques
//!
//! Epoch mechanism drops preload jobs made stale by a seek.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::{debug, trace};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Preload worker pool sharing its epoch counter with the `CacheManager`.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4, manager.epoch_ref())?;
/// let epoch = workers.current_epoch();
/// workers.execute_with_epoch(epoch, move || {
///     engine.preload(from, 10, &source).ok();
/// });
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
    /// Jobs queued or running
    pending: Arc<AtomicUsize>,
    /// Jobs dropped because their epoch went stale
    skipped: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers")
            .field("threads", &self.handles.len())
            .field("pending", &self.pending())
            .field("epoch", &self.current_epoch())
            .finish()
    }
}

fn find_job(local: &Worker<Job>, injector: &Injector<Job>, stealers: &[Stealer<Job>]) -> Option<Job> {
    local
        .pop()
        .or_else(|| injector.steal_batch_and_pop(local).success())
        .or_else(|| stealers.iter().find_map(|s| s.steal().success()))
}

impl Workers {
    /// Spawn `num_threads` workers (at least one) sharing `epoch`.
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> io::Result<Self> {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let pending = Arc::clone(&pending);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("posesync-preload-{}", worker_id))
                .spawn(move || {
                    trace!("Preload worker {} started", worker_id);
                    loop {
                        if let Some(job) = find_job(&local, &injector, &stealers) {
                            job();
                            pending.fetch_sub(1, Ordering::AcqRel);
                            continue;
                        }
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                    trace!("Preload worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        debug!("Workers initialized: {} threads", num_threads);

        Ok(Self {
            injector,
            handles,
            current_epoch: epoch,
            pending,
            skipped: Arc::new(AtomicU64::new(0)),
            shutdown,
        })
    }

    /// Pool sized to three quarters of the cores; the tick loop keeps the rest.
    pub fn with_default_threads(epoch: Arc<AtomicU64>) -> io::Result<Self> {
        Self::new((num_cpus::get() * 3 / 4).max(1), epoch)
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }

    /// Run `f` on a worker thread. No return value; share results through
    /// `Arc`s (the frame cache, usually).
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.injector.push(Box::new(f));
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Run `f` only if the epoch still equals `epoch` when a worker picks it
    /// up. The check happens at execution time, not at enqueue time.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        let skipped = Arc::clone(&self.skipped);
        self.execute(move || {
            if current_epoch.load(Ordering::Relaxed) == epoch {
                f();
            } else {
                skipped.fetch_add(1, Ordering::Relaxed);
                trace!("Skipping stale preload job (epoch {})", epoch);
            }
        });
    }

    /// Jobs queued or in flight
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Jobs dropped as stale so far
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Block until every queued job has finished. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);
        self.shutdown.store(true, Ordering::SeqCst);

        // 500ms for all threads; stragglers die with the process
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} workers stopped", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn pool(threads: usize) -> (Workers, Arc<AtomicU64>) {
        let epoch = Arc::new(AtomicU64::new(0));
        (Workers::new(threads, Arc::clone(&epoch)).unwrap(), epoch)
    }

    #[test]
    fn test_runs_all_jobs() {
        let (workers, _) = pool(3);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let count = Arc::clone(&count);
            workers.execute(move || {
                count.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert!(workers.wait_idle(Duration::from_secs(5)));
        assert_eq!(count.load(Ordering::Relaxed), 100);
        assert_eq!(workers.pending(), 0);
    }

    #[test]
    fn test_stale_epoch_skipped() {
        let (workers, epoch) = pool(1);
        let gate = Arc::new(Mutex::new(()));
        let ran = Arc::new(Mutex::new(Vec::new()));

        // Hold the only worker so the next jobs stay queued
        let held = gate.lock().unwrap();
        let g = Arc::clone(&gate);
        workers.execute(move || {
            let _unused = g.lock();
        });

        for i in 0..5 {
            let ran = Arc::clone(&ran);
            workers.execute_with_epoch(0, move || ran.lock().unwrap().push(i));
        }
        epoch.fetch_add(1, Ordering::SeqCst);
        let r = Arc::clone(&ran);
        workers.execute_with_epoch(1, move || r.lock().unwrap().push(99));
        drop(held);

        assert!(workers.wait_idle(Duration::from_secs(5)));
        assert_eq!(*ran.lock().unwrap(), vec![99]);
        assert_eq!(workers.skipped(), 5);
    }

    #[test]
    fn test_threads_named() {
        let (workers, _) = pool(1);
        let name = Arc::new(Mutex::new(String::new()));
        let n = Arc::clone(&name);
        workers.execute(move || {
            *n.lock().unwrap() = thread::current().name().unwrap_or_default().to_string();
        });
        assert!(workers.wait_idle(Duration::from_secs(5)));
        assert_eq!(*name.lock().unwrap(), "posesync-preload-0");
        assert_eq!(workers.num_threads(), 1);
    }

    #[test]
    fn test_zero_threads_clamped() {
        let (workers, _) = pool(0);
        assert_eq!(workers.num_threads(), 1);
    }
}
