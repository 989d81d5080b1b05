//! Order dispatcher: per-order serialization over a fixed worker pool
//!
//! Work tagged with an order id routes to worker `order_id % M`; each worker
//! is a single thread draining a bounded FIFO queue. Everything that touches
//! one order therefore executes serially, no matter which service initiated
//! it. Senders block when a worker's queue is full — ordering would break if
//! work were dropped or retried out of band.

use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::debug;

/// Bound on each worker's job queue
pub const WORKER_QUEUE_CAPACITY: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatcherError {
    #[error("dispatcher is closed")]
    Closed,
}

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Barrier(Sender<()>),
    Stop,
}

struct Worker {
    jobs: Sender<Job>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn new(index: usize) -> Self {
        let (jobs, rx) = bounded::<Job>(WORKER_QUEUE_CAPACITY);
        let handle = std::thread::spawn(move || {
            for job in rx {
                match job {
                    Job::Run(work) => work(),
                    Job::Barrier(done) => {
                        let _ = done.send(());
                    }
                    Job::Stop => break,
                }
            }
            debug!(worker = index, "dispatcher worker stopped");
        });
        Self {
            jobs,
            handle: Mutex::new(Some(handle)),
        }
    }
}

/// Fixed pool of single-consumer workers keyed by order id
pub struct Dispatcher {
    workers: Vec<Worker>,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Create a pool of `worker_count` workers
    ///
    /// # Panics
    /// Panics if `worker_count` is zero.
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "dispatcher_workers must be positive");
        Self {
            workers: (0..worker_count).map(Worker::new).collect(),
            closed: AtomicBool::new(false),
        }
    }

    /// The worker index a key routes to
    pub fn worker_index(&self, key: u64) -> usize {
        (key % self.workers.len() as u64) as usize
    }

    /// Enqueue work on the key's lane; blocks while that lane is full
    pub fn dispatch(
        &self,
        key: u64,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<(), DispatcherError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatcherError::Closed);
        }
        let worker = &self.workers[self.worker_index(key)];
        worker
            .jobs
            .send(Job::Run(Box::new(work)))
            .map_err(|_| DispatcherError::Closed)
    }

    /// Wait until every worker has consumed everything enqueued so far.
    ///
    /// Runs two barrier rounds: work enqueued by in-flight work (a taker's
    /// lane fanning fills out to maker lanes) settles on the second round.
    pub fn drain(&self) {
        for _ in 0..2 {
            let waits: Vec<_> = self
                .workers
                .iter()
                .filter_map(|worker| {
                    let (done, done_rx) = bounded(1);
                    worker.jobs.send(Job::Barrier(done)).ok()?;
                    Some(done_rx)
                })
                .collect();
            for wait in waits {
                let _ = wait.recv();
            }
        }
    }

    /// Stop accepting work, let queued work finish, and join the workers
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in &self.workers {
            let _ = worker.jobs.send(Job::Stop);
        }
        for worker in &self.workers {
            let handle = worker
                .handle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
