//! Worker pool for per-file transformations.
//!
//! The engine owns a fixed number of worker threads that pull work items from
//! one shared queue.
//!
//! # How It Works
//!
//! 1. Workers are spawned on the first batch, not when the engine is created
//! 2. A batch is queued in full; every item counts a [`Latch`] down when it
//!    finishes, whether it returned or panicked
//! 3. [`TransformEngine::run_all`] returns once the latch reaches zero, so the
//!    caller never observes a half-finished batch
//! 4. Workers stay alive between batches and are retired when the engine is
//!    dropped
//!
//! # Example
//!
//! ```ignore
//! use rpbuild::build::TransformEngine;
//!
//! let engine = TransformEngine::new(4);
//! let items: Vec<WorkItem> = files.into_iter().map(|f| work_for(f)).collect();
//! let stats = engine.run_all(items)?;
//! println!("{stats}");
//! ```

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error};

use crate::plugin::error::panic_message;

/// Default number of workers (uses available parallelism).
pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// One independent unit of work. Items must handle their own errors; a panic
/// is caught and counted but never reaches other items.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn transform worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("transform workers are no longer running")]
    Disconnected,
}

/// Countdown that releases waiters when it reaches zero.
#[derive(Debug)]
pub struct Latch {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self { remaining: Mutex::new(count), released: Condvar::new() }
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.released.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        while *remaining > 0 {
            remaining = self.released.wait(remaining).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub items: usize,
    pub panicked: usize,
    pub elapsed: Duration,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} items in {:.2?}", self.items, self.elapsed)?;
        if self.panicked > 0 {
            write!(f, " ({} panicked)", self.panicked)?;
        }
        Ok(())
    }
}

struct Job {
    work: WorkItem,
    latch: Arc<Latch>,
    panicked: Arc<AtomicUsize>,
}

impl Job {
    fn run(self) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(self.work)) {
            self.panicked.fetch_add(1, Ordering::Relaxed);
            error!(message = %panic_message(payload), "work item panicked");
        }
        self.latch.count_down();
    }
}

struct Pool {
    sender: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

/// Fixed-size, lazily started worker pool.
pub struct TransformEngine {
    workers: usize,
    pool: Mutex<Option<Pool>>,
}

impl TransformEngine {
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1), pool: Mutex::new(None) }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether worker threads have been started.
    pub fn is_started(&self) -> bool {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Run every item and wait for all of them.
    ///
    /// Items run in any order and on any worker. An empty batch returns at
    /// once without starting the pool.
    pub fn run_all(&self, items: Vec<WorkItem>) -> Result<EngineStats, EngineError> {
        let start = Instant::now();
        let count = items.len();
        if count == 0 {
            return Ok(EngineStats { items: 0, panicked: 0, elapsed: start.elapsed() });
        }

        let latch = Arc::new(Latch::new(count));
        let panicked = Arc::new(AtomicUsize::new(0));
        let sender = self.sender()?;

        let mut disconnected = false;
        for work in items {
            if disconnected {
                latch.count_down();
                continue;
            }
            let job = Job { work, latch: Arc::clone(&latch), panicked: Arc::clone(&panicked) };
            if sender.send(job).is_err() {
                latch.count_down();
                disconnected = true;
            }
        }

        latch.wait();
        if disconnected {
            return Err(EngineError::Disconnected);
        }

        let stats = EngineStats {
            items: count,
            panicked: panicked.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        };
        debug!(workers = self.workers, %stats, "batch finished");
        Ok(stats)
    }

    /// Stop and join the workers. The next batch starts a fresh pool.
    pub fn shutdown(&self) {
        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(Pool { sender, handles }) = pool {
            drop(sender);
            for handle in handles {
                let _ = handle.join();
            }
            debug!(workers = self.workers, "transform workers retired");
        }
    }

    fn sender(&self) -> Result<Sender<Job>, EngineError> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pool.as_ref() {
            return Ok(pool.sender.clone());
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("rpbuild-worker-{index}"))
                .spawn(move || worker_loop(&receiver))
                .map_err(EngineError::Spawn)?;
            handles.push(handle);
        }
        debug!(workers = self.workers, "transform workers started");

        *pool = Some(Pool { sender: sender.clone(), handles });
        Ok(sender)
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        let next = receiver.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match next {
            Ok(job) => job.run(),
            Err(_) => break,
        }
    }
}

impl Drop for TransformEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TransformEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformEngine")
            .field("workers", &self.workers)
            .field("started", &self.is_started())
            .finish()
    }
}
