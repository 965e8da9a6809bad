use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::runtime::error::{Error, WorkError};
use crate::runtime::promise::Resolver;
use crate::runtime::task::TaskId;

enum Dispatch {
    Run,
    Abandon,
}

/// A unit of work handed to a [`Scheduler`].
///
/// A job is consumed exactly once: either [`run`](Job::run) executes it, or
/// [`abandon`](Job::abandon) fails the promise waiting on it with
/// [`WorkError::Rejected`].
pub struct Job {
    id: TaskId,
    body: Box<dyn FnOnce(Dispatch) + Send>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish()
    }
}

impl Job {
    /// Builds a job that settles `resolver` with the outcome of `work`.
    ///
    /// Panics inside `work` are caught here and stored as
    /// [`WorkError::Panicked`], so a failing task never unwinds the thread
    /// running it.
    pub(crate) fn settling<T, F>(resolver: Resolver<T>, work: F) -> Self
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T, WorkError> + Send + 'static,
    {
        Self::continuing(resolver, move |resolver| {
            let id = resolver.id();
            let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let error = WorkError::from_panic(payload);
                    warn!(task_id = %id, %error, "task panicked");
                    Err(error)
                }
            };
            resolver.settle(outcome);
        })
    }

    /// Builds a job that hands `resolver` to `step`. Abandoning the job
    /// rejects the resolver instead.
    pub(crate) fn continuing<T, F>(resolver: Resolver<T>, step: F) -> Self
    where
        T: Clone + Send + 'static,
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        let id = resolver.id();
        let body = move |dispatch: Dispatch| match dispatch {
            Dispatch::Run => step(resolver),
            Dispatch::Abandon => resolver.reject(WorkError::Rejected),
        };

        Self {
            id,
            body: Box::new(body),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn run(self) {
        (self.body)(Dispatch::Run)
    }

    pub fn abandon(self) {
        (self.body)(Dispatch::Abandon)
    }
}

/// Where continuations and submitted work get executed.
///
/// A scheduler that refuses a job must [`abandon`](Job::abandon) it before
/// returning the error, so the promise behind it still settles.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, job: Job) -> Result<(), Error>;
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Scheduler for Inline {
    fn schedule(&self, job: Job) -> Result<(), Error> {
        job.run();
        Ok(())
    }
}

impl<S> Scheduler for Arc<S>
where
    S: Scheduler + ?Sized,
{
    fn schedule(&self, job: Job) -> Result<(), Error> {
        (**self).schedule(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::promise::Promise;

    #[test]
    fn test_inline_runs_on_caller() {
        let (resolver, promise) = Promise::channel();
        let caller = std::thread::current().id();

        Inline
            .schedule(Job::settling(resolver, move || {
                Ok(std::thread::current().id() == caller)
            }))
            .unwrap();

        assert!(promise.join().unwrap());
    }

    #[test]
    fn test_panic_becomes_failure() {
        let (resolver, promise) = Promise::<i32>::channel();

        Job::settling(resolver, || panic!("stock service down")).run();

        let err = promise.join().unwrap_err();
        assert!(matches!(
            err.work_error(),
            Some(WorkError::Panicked(msg)) if msg == "stock service down"
        ));
    }

    #[test]
    fn test_abandon_rejects() {
        let (resolver, promise) = Promise::<i32>::channel();

        Job::settling(resolver, || Ok(1)).abandon();

        assert!(matches!(promise.join(), Err(Error::ExecutorClosed)));
    }
}
