use std::str::FromStr;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::runtime::error::Error;
use crate::runtime::executor::Executor;

pub const ENV_WORKERS: &str = "TANDEM_WORKERS";
pub const ENV_THREAD_NAME: &str = "TANDEM_THREAD_NAME";
pub const ENV_SHUTDOWN: &str = "TANDEM_SHUTDOWN";

/// What `shutdown` does with jobs that are queued but not yet started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run every queued job, then stop the workers.
    #[default]
    Drain,
    /// Fail queued jobs with `WorkError::Rejected`; only running jobs finish.
    Abort,
}

impl FromStr for ShutdownPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(ShutdownPolicy::Drain),
            "abort" => Ok(ShutdownPolicy::Abort),
            other => Err(Error::InvalidConfig(format!(
                "unknown shutdown policy `{other}` (expected `drain` or `abort`)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker thread count. `None` means one per available CPU.
    pub workers: Option<usize>,
    /// Prefix for worker thread names, suffixed with the worker index.
    pub thread_name: String,
    pub shutdown: ShutdownPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: None,
            thread_name: "tandem-worker".to_string(),
            shutdown: ShutdownPolicy::Drain,
        }
    }
}

impl ExecutorConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `TANDEM_WORKERS`, `TANDEM_THREAD_NAME` and `TANDEM_SHUTDOWN`,
    /// keeping defaults for anything unset.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_WORKERS) {
            let workers = raw.trim().parse::<usize>().map_err(|e| {
                Error::InvalidConfig(format!("{ENV_WORKERS}=`{raw}` is not a count: {e}"))
            })?;
            config.workers = Some(workers);
        }
        if let Some(name) = lookup(ENV_THREAD_NAME) {
            config.thread_name = name;
        }
        if let Some(raw) = lookup(ENV_SHUTDOWN) {
            config.shutdown = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == Some(0) {
            return Err(Error::InvalidConfig("workers must be > 0".to_string()));
        }
        if self.thread_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The worker count to spawn, falling back to available parallelism
    /// (or `1` if that is unknown).
    pub fn resolved_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Builder for configuring and creating an [`Executor`].
///
/// ```rust,ignore
/// let executor = ExecutorBuilder::new()
///     .workers(4)
///     .shutdown_policy(ShutdownPolicy::Abort)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutorBuilder {
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = Some(n);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.config.shutdown = policy;
        self
    }

    /// Validates the configuration and starts the worker threads.
    pub fn build(self) -> Result<Executor, Error> {
        Executor::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();

        assert_eq!(config.workers, None);
        assert_eq!(config.shutdown, ShutdownPolicy::Drain);
        assert!(config.resolved_workers() >= 1);
    }

    #[test]
    fn test_from_json_partial() {
        let config = ExecutorConfig::from_json(r#"{ "workers": 3, "shutdown": "abort" }"#).unwrap();

        assert_eq!(config.workers, Some(3));
        assert_eq!(config.resolved_workers(), 3);
        assert_eq!(config.shutdown, ShutdownPolicy::Abort);
        assert_eq!(config.thread_name, "tandem-worker");
    }

    #[test]
    fn test_from_json_rejects_zero_workers() {
        let err = ExecutorConfig::from_json(r#"{ "workers": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_from_json_malformed() {
        let err = ExecutorConfig::from_json("{ workers: ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_lookup() {
        let config = ExecutorConfig::from_lookup(lookup(&[
            (ENV_WORKERS, " 2 "),
            (ENV_THREAD_NAME, "pool"),
            (ENV_SHUTDOWN, "Abort"),
        ]))
        .unwrap();

        assert_eq!(config.workers, Some(2));
        assert_eq!(config.thread_name, "pool");
        assert_eq!(config.shutdown, ShutdownPolicy::Abort);
    }

    #[test]
    fn test_from_lookup_bad_values() {
        assert!(ExecutorConfig::from_lookup(lookup(&[(ENV_WORKERS, "many")])).is_err());
        assert!(ExecutorConfig::from_lookup(lookup(&[(ENV_SHUTDOWN, "later")])).is_err());
        assert!(ExecutorConfig::from_lookup(lookup(&[(ENV_THREAD_NAME, "  ")])).is_err());
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let config = ExecutorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ExecutorConfig::default());
    }
}
