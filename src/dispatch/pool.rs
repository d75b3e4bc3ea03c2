//! Bounded worker pool.
//!
//! A fixed set of named threads draining a bounded job queue. Submission
//! waits for queue space until a caller-supplied deadline; a job that still
//! does not fit is handed back so the caller can undo what it owns.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

use crate::error::DispatchError;

/// Unit of work run on a pool thread.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job the pool did not accept, returned unrun.
pub(crate) struct Rejected {
    pub(crate) error: DispatchError,
    pub(crate) job: Job,
}

pub(crate) struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .field("running", &self.is_running())
            .finish()
    }
}

impl WorkerPool {
    pub(crate) fn start(name: &str, workers: usize, queue_capacity: usize) -> Result<Self, DispatchError> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut pool = Self {
            tx: Some(tx),
            workers: Vec::with_capacity(workers),
            queue_capacity,
        };
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("reconcile-{name}-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        // A panicking job must not take the worker down with it.
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("worker_job_panicked");
                        }
                    }
                })
                .map_err(|e| DispatchError::Spawn {
                    message: e.to_string(),
                });
            match handle {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }

        tracing::debug!(pool = name, workers, queue_capacity, "worker_pool_started");
        Ok(pool)
    }

    pub(crate) const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub(crate) const fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    /// Queues `job`, waiting for space until `deadline`.
    ///
    /// A past deadline still accepts the job if the queue has room.
    pub(crate) fn submit_until(&self, job: Job, deadline: Instant) -> Result<(), Rejected> {
        let Some(tx) = &self.tx else {
            return Err(Rejected {
                error: DispatchError::Shutdown,
                job,
            });
        };
        match tx.send_deadline(job, deadline) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(job)) => Err(Rejected {
                error: DispatchError::QueueFull {
                    capacity: self.queue_capacity,
                },
                job,
            }),
            Err(SendTimeoutError::Disconnected(job)) => Err(Rejected {
                error: DispatchError::Shutdown,
                job,
            }),
        }
    }

    /// Closes the queue, lets workers drain it, and joins them. Idempotent.
    pub(crate) fn shutdown(&mut self) {
        // Dropping the sender ends every worker's recv loop once the queue is empty.
        if self.tx.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
