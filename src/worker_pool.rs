//! # Worker Pool Module
//!
//! A fixed set of OS threads pulling jobs from one bounded queue. Each job is a whole request:
//! extraction, handler, rendering and close all run on the worker that picked it up.
//!
//! ## Features
//!
//! - **Bounded Queue**: `crossbeam-channel` with `queue_bound` slots. Producers block when it is
//!   full, so a flood of connections pushes back on the acceptor instead of growing memory
//! - **Load Balancing**: workers share the receiver and take the next job as they free up
//! - **Panic Containment**: a panicking job is logged and the worker keeps serving
//! - **Metrics**: dispatched and completed counts plus the approximate queue depth
//!
//! ## Configuration
//!
//! - `PIN_WORKERS`: number of worker threads (default: 10)
//! - `PIN_QUEUE_BOUND`: queue slots (default: 1024)

use crossbeam_channel::{bounded, Receiver, Sender};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info};

/// Unit of work run on a worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for a worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Maximum queue depth
    pub queue_bound: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 10,
            queue_bound: 1024,
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Current queue depth (approximate)
    pub queue_depth: AtomicUsize,
    /// Total jobs dispatched
    pub dispatched_count: AtomicU64,
    /// Total jobs completed, panicked ones included
    pub completed_count: AtomicU64,
    /// Jobs that panicked
    pub panicked_count: AtomicU64,
}

impl WorkerPoolMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.panicked_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    pub fn get_panicked_count(&self) -> u64 {
        self.panicked_count.load(Ordering::Relaxed)
    }
}

/// The pool has shut down; the job was not queued.
#[derive(Debug, Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl WorkerPool {
    /// Spawn the worker threads.
    ///
    /// # Errors
    ///
    /// Returns the OS error when a thread cannot be spawned; threads already started are stopped.
    pub fn new(config: WorkerPoolConfig) -> io::Result<Self> {
        let (tx, rx) = bounded::<Job>(config.queue_bound.max(1));
        let metrics = Arc::new(WorkerPoolMetrics::new());

        info!(
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            "Creating worker pool"
        );

        let mut pool = Self {
            config,
            sender: Some(tx),
            workers: Vec::with_capacity(config.num_workers),
            metrics,
        };
        for worker_id in 0..config.num_workers.max(1) {
            let rx = rx.clone();
            let metrics = Arc::clone(&pool.metrics);
            let spawned = thread::Builder::new()
                .name(format!("pinhttp-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, &rx, &metrics));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    error!(worker_id = worker_id, error = %e, "Failed to spawn worker thread");
                    pool.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    /// Queue a job, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// [`PoolClosed`] after [`shutdown`](WorkerPool::shutdown).
    pub fn execute<F>(&self, job: F) -> Result<(), PoolClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolClosed)?;
        self.metrics.record_dispatch();
        if sender.send(Box::new(job)).is_err() {
            self.metrics.record_start();
            error!("Worker pool channel disconnected");
            return Err(PoolClosed);
        }
        Ok(())
    }

    /// Stop accepting jobs, let the workers drain the queue and join them.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(worker_id: usize, rx: &Receiver<Job>, metrics: &WorkerPoolMetrics) {
    debug!(worker_id = worker_id, "Worker thread started");
    // the loop ends once every sender is gone and the queue is drained
    for job in rx.iter() {
        metrics.record_start();
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
            metrics.record_panic();
            error!(
                worker_id = worker_id,
                panic_message = ?panic,
                "Job panicked"
            );
        }
        metrics.record_completion();
    }
    debug!(worker_id = worker_id, "Worker thread exiting");
}
