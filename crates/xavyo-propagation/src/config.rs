use std::time::Duration;

use serde::Deserialize;

use crate::executor::ExecutorConfig;
use crate::model::AsyncPolicy;
use crate::worker::RetryWorkerConfig;

/// Configuration of the propagation engine and its retry worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Retries allowed per failed task. `0` or less disables retries.
    pub max_retries: i32,

    /// Policy used when a call does not name one.
    pub async_policy: AsyncPolicy,

    /// Maximum non-priority writes in flight.
    pub worker_concurrency: usize,

    /// Identity recorded on execution records.
    pub executor: String,

    /// Skip non-priority resources once a priority resource failed.
    pub skip_non_priority_on_failure: bool,

    /// Seconds between two retry passes.
    pub retry_interval_secs: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            async_policy: AsyncPolicy::Auto,
            worker_concurrency: 8,
            executor: "propagation".to_string(),
            skip_non_priority_on_failure: true,
            retry_interval_secs: 60,
        }
    }
}

impl PropagationConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let defaults = Self::default();

        let max_retries = match reader("PROPAGATION_MAX_RETRIES") {
            Ok(v) => v.trim().parse::<i32>().map_err(|e| {
                ConfigError::InvalidValue("PROPAGATION_MAX_RETRIES".into(), e.to_string())
            })?,
            Err(_) => defaults.max_retries,
        };

        let async_policy = match reader("PROPAGATION_ASYNC_POLICY") {
            Ok(v) => v.trim().parse::<AsyncPolicy>().map_err(|e| {
                ConfigError::InvalidValue("PROPAGATION_ASYNC_POLICY".into(), e.to_string())
            })?,
            Err(_) => defaults.async_policy,
        };

        let worker_concurrency = match reader("PROPAGATION_WORKER_CONCURRENCY") {
            Ok(v) => match v.trim().parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidValue(
                        "PROPAGATION_WORKER_CONCURRENCY".into(),
                        "must be at least 1".into(),
                    ))
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::InvalidValue(
                        "PROPAGATION_WORKER_CONCURRENCY".into(),
                        e.to_string(),
                    ))
                }
            },
            Err(_) => defaults.worker_concurrency,
        };

        let executor = reader("PROPAGATION_EXECUTOR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.executor);

        let skip_non_priority_on_failure = reader("PROPAGATION_SKIP_NON_PRIORITY_ON_FAILURE")
            .unwrap_or_else(|_| "true".to_string())
            .trim()
            .parse::<bool>()
            .map_err(|e| {
                ConfigError::InvalidValue(
                    "PROPAGATION_SKIP_NON_PRIORITY_ON_FAILURE".into(),
                    e.to_string(),
                )
            })?;

        let retry_interval_secs = reader("PROPAGATION_RETRY_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .trim()
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidValue("PROPAGATION_RETRY_INTERVAL_SECS".into(), e.to_string())
            })?;

        Ok(Self {
            max_retries,
            async_policy,
            worker_concurrency,
            executor,
            skip_non_priority_on_failure,
            retry_interval_secs,
        })
    }

    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            concurrency: self.worker_concurrency,
            executor_name: self.executor.clone(),
            skip_non_priority_on_priority_failure: self.skip_non_priority_on_failure,
        }
    }

    #[must_use]
    pub fn worker_config(&self) -> RetryWorkerConfig {
        RetryWorkerConfig {
            interval: Duration::from_secs(self.retry_interval_secs.max(1)),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
