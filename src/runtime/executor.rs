use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::runtime::config::{ExecutorBuilder, ExecutorConfig, ShutdownPolicy};
use crate::runtime::error::{Error, WorkError};
use crate::runtime::promise::Promise;
use crate::runtime::scheduler::{Job, Scheduler};
use crate::runtime::task::{Task, TaskWrapper};
use crate::runtime::worker::{JobQueue, Worker};

/// Cloneable submission handle to an [`Executor`]'s pool.
///
/// This is what `*_async` combinators take to pick the pool a continuation
/// runs on. A handle does not keep the workers alive; once the executor
/// shuts down, everything submitted through any handle is rejected.
#[derive(Clone)]
pub struct Handle {
    queue: Arc<JobQueue>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Handle {
    /// Schedules `task` and returns a promise for its outcome.
    ///
    /// After shutdown the returned promise is already failed with
    /// [`WorkError::Rejected`]; joining it yields [`Error::ExecutorClosed`].
    pub fn submit<W>(&self, task: W) -> Promise<W::Output>
    where
        W: Task,
    {
        let id = task.task_id();
        let (resolver, promise) = Promise::channel_with_id(id);
        trace!(task_id = %id, "submitting task");

        // A rejected job is abandoned by `schedule`, which fails the promise.
        let _ = self.schedule(Job::settling(resolver, move || task.call()));
        promise
    }

    /// Runs an infallible closure on the pool.
    pub fn supply<T, F>(&self, f: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit(TaskWrapper::new(move || Ok(f())))
    }

    /// Runs a fallible closure on the pool.
    pub fn try_supply<T, E, F>(&self, f: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        E: Into<WorkError>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.submit(TaskWrapper::new(move || f().map_err(Into::into)))
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl Scheduler for Handle {
    fn schedule(&self, job: Job) -> Result<(), Error> {
        self.queue.push(job).map_err(|job| {
            warn!(task_id = %job.id(), "executor is shut down, rejecting job");
            job.abandon();
            Error::ExecutorClosed
        })
    }
}

struct Lifecycle {
    workers: Vec<JoinHandle<()>>,
    worker_ids: Vec<ThreadId>,
    stopping: bool,
    stopped: bool,
}

/// A fixed pool of worker threads draining a FIFO job queue.
///
/// Lifecycle is explicit: construct (via [`ExecutorBuilder`] or
/// [`Executor::new`]), submit, then [`shutdown`](Executor::shutdown).
/// Dropping the executor shuts it down as well.
pub struct Executor {
    handle: Handle,
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
    size: usize,
    policy: ShutdownPolicy,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.size)
            .field("policy", &self.policy)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Executor {
    /// Validates `config` and spawns its worker threads.
    pub fn new(config: ExecutorConfig) -> Result<Self, Error> {
        config.validate()?;

        let size = config.resolved_workers();
        let queue = Arc::new(JobQueue::new());
        let executor = Self {
            handle: Handle {
                queue: queue.clone(),
            },
            lifecycle: Mutex::new(Lifecycle {
                workers: Vec::with_capacity(size),
                worker_ids: Vec::with_capacity(size),
                stopping: false,
                stopped: false,
            }),
            stopped: Condvar::new(),
            size,
            policy: config.shutdown,
        };

        for id in 0..size {
            let worker = Worker::new(id, queue.clone());
            // On failure `executor` is dropped here, which stops the workers
            // spawned so far.
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, id))
                .spawn(move || worker.run())?;
            let mut lifecycle = executor.lifecycle.lock();
            lifecycle.worker_ids.push(handle.thread().id());
            lifecycle.workers.push(handle);
        }

        debug!(workers = size, policy = ?config.shutdown, "executor started");
        Ok(executor)
    }

    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn submit<W>(&self, task: W) -> Promise<W::Output>
    where
        W: Task,
    {
        self.handle.submit(task)
    }

    pub fn supply<T, F>(&self, f: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.handle.supply(f)
    }

    pub fn try_supply<T, E, F>(&self, f: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        E: Into<WorkError>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.handle.try_supply(f)
    }

    pub fn workers(&self) -> usize {
        self.size
    }

    pub fn policy(&self) -> ShutdownPolicy {
        self.policy
    }

    pub fn is_shutdown(&self) -> bool {
        self.handle.is_closed()
    }

    /// Stops accepting submissions and waits for the workers to exit.
    ///
    /// Running jobs are never interrupted. Queued jobs run under
    /// [`ShutdownPolicy::Drain`] and are rejected under
    /// [`ShutdownPolicy::Abort`]. Either way every promise submitted before
    /// this call is settled when it returns, except when called from one of
    /// this pool's own workers: that thread cannot be joined and finishes on
    /// its own.
    ///
    /// Concurrent callers all wait for the same workers to exit; calling it
    /// again afterwards returns at once.
    pub fn shutdown(&self) {
        let abandoned = self.handle.queue.close(self.policy);
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "abandoning queued jobs");
        }
        for job in abandoned {
            job.abandon();
        }

        let current = thread::current().id();
        let handles = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.stopping {
                if !lifecycle.worker_ids.contains(&current) {
                    while !lifecycle.stopped {
                        self.stopped.wait(&mut lifecycle);
                    }
                }
                return;
            }
            lifecycle.stopping = true;
            std::mem::take(&mut lifecycle.workers)
        };

        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }

        self.lifecycle.lock().stopped = true;
        self.stopped.notify_all();

        info!(workers = self.size, "executor shut down");
    }
}

impl Scheduler for Executor {
    fn schedule(&self, job: Job) -> Result<(), Error> {
        self.handle.schedule(job)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
