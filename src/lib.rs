//! # tandem
//!
//! Composable promises driven by an explicitly constructed worker pool.
//!
//! Work is submitted to an [`Executor`](runtime::Executor) and observed
//! through a [`Promise`](runtime::Promise). Promises can be mapped, chained,
//! recovered, combined and raced; every combinator returns a new promise
//! immediately, and only `join` blocks.
//!
//! ```rust,ignore
//! use tandem::runtime::{Executor, ExecutorConfig, Promise};
//!
//! let executor = Executor::new(ExecutorConfig::default())?;
//! let total = executor
//!     .supply(|| 7)
//!     .flat_map_async(executor.handle(), |_| Promise::completed(8))
//!     .map(|v| v + 1)
//!     .join()?;
//! executor.shutdown();
//! ```

pub mod runtime;

pub use runtime::{Error, Executor, ExecutorBuilder, Promise, WorkError};
pub use tandem_macros::*;
