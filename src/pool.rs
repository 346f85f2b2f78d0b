//! Worker pool runtime: a set of threads draining a shared job queue.
//!
//! # Architecture
//!
//! The pool owns one [`Fifo`] of boxed jobs and N worker threads. Workers
//! loop on `pop`: run the job if one is ready, otherwise check the
//! shutdown flag, otherwise yield. Shutdown is cooperative; workers finish
//! draining the queue before they exit, so every submitted job runs.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use conveyor::{PoolConfig, WorkerPool};
//!
//! let pool = WorkerPool::spawn(PoolConfig::default());
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..100 {
//!     let counter = Arc::clone(&counter);
//!     pool.submit(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .unwrap();
//! }
//!
//! pool.shutdown();
//! assert_eq!(counter.load(Ordering::Relaxed), 100);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::fifo::{DEFAULT_CAPACITY, Fifo, QueueFull};
use crate::job::Job;
use crate::trace::{debug, info};

/// Configuration for the worker pool.
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Initial slot count of the job queue.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(4, usize::from),
            queue_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Handle to a running worker pool.
///
/// Dropping the handle signals shutdown but does not wait for workers to
/// exit. Use [`WorkerPool::shutdown`] for a graceful drain-and-join.
pub struct WorkerPool {
    queue: Arc<Fifo<Box<dyn Job>>>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the worker threads.
    ///
    /// # Panics
    ///
    /// Panics if thread spawning fails.
    #[must_use]
    pub fn spawn(config: PoolConfig) -> Self {
        let queue = Arc::new(Fifo::<Box<dyn Job>>::with_capacity(config.queue_capacity));
        let shutdown = Arc::new(AtomicBool::new(false));

        info!(workers = config.workers, "spawning worker pool");

        let handles = (0..config.workers)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let shutdown = Arc::clone(&shutdown);
                thread::Builder::new()
                    .name(format!("conveyor-worker-{worker}"))
                    .spawn(move || {
                        debug!("worker started");
                        loop {
                            if let Some(job) = queue.pop() {
                                job.invoke();
                            } else if shutdown.load(Ordering::Acquire) {
                                break;
                            } else {
                                thread::yield_now();
                            }
                        }
                        debug!("worker exiting");
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            queue,
            shutdown,
            handles,
        }
    }

    /// The pool's job queue, for callers that enqueue pre-boxed jobs or
    /// probe `is_empty`.
    #[must_use]
    pub fn queue(&self) -> &Arc<Fifo<Box<dyn Job>>> {
        &self.queue
    }

    /// Boxes `job` and enqueues it.
    ///
    /// A job that panics takes its worker thread down with it; wrap
    /// fallible work in its own recovery if the pool must outlive it.
    ///
    /// # Errors
    ///
    /// Propagates [`QueueFull`] from the underlying queue.
    pub fn submit<F>(&self, job: F) -> Result<(), QueueFull<Box<dyn Job>>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(job))
    }

    /// Signals shutdown and joins all workers.
    ///
    /// Workers drain the queue before exiting, so every job submitted
    /// before this call runs to completion.
    pub fn shutdown(mut self) {
        info!("worker pool shutdown initiated");
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                debug!("worker exited by panic");
            }
        }
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
