use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::runtime::config::ShutdownPolicy;
use crate::runtime::scheduler::Job;

struct Backlog {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// FIFO job queue shared by all workers of one executor.
///
/// Workers block on the condition variable while the queue is empty. Once
/// closed, the queue refuses new jobs and `pop` returns `None` as soon as it
/// runs dry.
pub(crate) struct JobQueue {
    backlog: Mutex<Backlog>,
    available: Condvar,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            backlog: Mutex::new(Backlog {
                jobs: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues `job`, handing it back if the queue is closed.
    pub(crate) fn push(&self, job: Job) -> Result<(), Job> {
        let mut backlog = self.backlog.lock();
        if backlog.closed {
            return Err(job);
        }
        backlog.jobs.push_back(job);
        drop(backlog);

        self.available.notify_one();
        Ok(())
    }

    /// Blocks until a job is available, or returns `None` once the queue is
    /// closed and empty.
    pub(crate) fn pop(&self) -> Option<Job> {
        let mut backlog = self.backlog.lock();
        loop {
            if let Some(job) = backlog.jobs.pop_front() {
                return Some(job);
            }
            if backlog.closed {
                return None;
            }
            self.available.wait(&mut backlog);
        }
    }

    /// Closes the queue and wakes every worker. Under `Abort` the jobs that
    /// never started are returned so the caller can abandon them outside
    /// the lock.
    pub(crate) fn close(&self, policy: ShutdownPolicy) -> Vec<Job> {
        let mut backlog = self.backlog.lock();
        backlog.closed = true;
        let abandoned = match policy {
            ShutdownPolicy::Drain => Vec::new(),
            ShutdownPolicy::Abort => backlog.jobs.drain(..).collect(),
        };
        drop(backlog);

        self.available.notify_all();
        abandoned
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.backlog.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.backlog.lock().jobs.len()
    }
}

/// A worker thread in the executor.
///
/// Runs jobs in the order the queue hands them out until the queue is closed
/// and drained.
pub(crate) struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
}

impl Worker {
    pub(crate) fn new(id: usize, queue: Arc<JobQueue>) -> Self {
        Self { id, queue }
    }

    pub(crate) fn run(&self) {
        debug!(worker = self.id, "worker started");

        while let Some(job) = self.queue.pop() {
            let task_id = job.id();
            trace!(worker = self.id, %task_id, "running job");

            // Jobs already capture panics from user code. This only fires if
            // a custom continuation escapes that, and keeps the worker alive.
            if panic::catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
                error!(worker = self.id, %task_id, "job panicked outside its task boundary");
            }
        }

        debug!(worker = self.id, "worker stopped");
    }
}
