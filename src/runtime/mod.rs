//! Promise/executor core.
//!
//! - [`task`]: units of work ([`Task`], [`TaskWrapper`])
//! - [`promise`]: the settle-once result slot and its continuations
//! - [`scheduler`]: where jobs run ([`Inline`] or a pool [`Handle`])
//! - [`executor`]: the worker pool and its shutdown policy
//! - [`combine`]: combinators over several promises
//! - [`config`]: executor configuration and builder

pub mod combine;
pub mod config;
pub mod error;
pub mod executor;
pub mod promise;
pub mod scheduler;
pub mod task;

mod worker;

pub use combine::{accept_either, all_of, any_of, either, first_success, join_all};
pub use config::{ExecutorBuilder, ExecutorConfig, ShutdownPolicy};
pub use error::{Error, WorkError};
pub use executor::{Executor, Handle};
pub use promise::{Outcome, Promise, Resolver};
pub use scheduler::{Inline, Job, Scheduler};
pub use task::{Task, TaskId, TaskWrapper};
