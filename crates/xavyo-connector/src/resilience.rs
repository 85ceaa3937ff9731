//! In-call retries for resource writes.
//!
//! In-call retry with fixed, exponential or randomized exponential backoff.
//! A resource's propagation policy is turned into a [`RetryExecutor`] that
//! wraps every write to that resource.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConnectorResult;
use crate::types::ParseEnumError;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Constant delay.
    #[default]
    Fixed,
    /// Delay multiplied on every attempt, capped at the max delay.
    Exponential,
    /// Exponential with a random factor in `[1, multiplier)` per attempt.
    Random,
}

impl BackoffStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Exponential => "exponential",
            BackoffStrategy::Random => "random",
        }
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackoffStrategy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "exponential" => Ok(BackoffStrategy::Exponential),
            "random" => Ok(BackoffStrategy::Random),
            _ => Err(ParseEnumError::new("backoff strategy", s, "fixed, exponential, random")),
        }
    }
}

/// Configuration for in-call retries of a single write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub strategy: BackoffStrategy,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential and random backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Fixed,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Build a config from a `initial;max;multiplier` parameter string.
    ///
    /// Values are in milliseconds. Missing or unparseable entries keep their
    /// defaults; parse failures are logged and otherwise ignored.
    #[must_use]
    pub fn from_backoff_params(max_attempts: u32, strategy: BackoffStrategy, params: &str) -> Self {
        let mut config = Self {
            max_attempts,
            strategy,
            ..Self::default()
        };

        let parts: Vec<&str> = params
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if let Some(initial) = parts.first() {
            match initial.parse::<u64>() {
                Ok(ms) => config.initial_delay = Duration::from_millis(ms),
                Err(e) => warn!(value = %initial, error = %e, "Could not parse initial backoff delay"),
            }
        }
        if strategy != BackoffStrategy::Fixed {
            if let Some(max) = parts.get(1) {
                match max.parse::<u64>() {
                    Ok(ms) => config.max_delay = Duration::from_millis(ms),
                    Err(e) => warn!(value = %max, error = %e, "Could not parse max backoff delay"),
                }
            }
            if let Some(multiplier) = parts.get(2) {
                match multiplier.parse::<f64>() {
                    Ok(m) if m >= 1.0 => config.multiplier = m,
                    Ok(m) => warn!(value = m, "Backoff multiplier below 1.0 ignored"),
                    Err(e) => {
                        warn!(value = %multiplier, error = %e, "Could not parse backoff multiplier");
                    }
                }
            }
        }

        config
    }
}

/// Wraps one write call with the configured retries.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Pause before retry number `retry + 1`.
    #[must_use]
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let RetryConfig {
            strategy,
            initial_delay,
            max_delay,
            multiplier,
            ..
        } = &self.config;

        let grown = || initial_delay.as_millis() as f64 * multiplier.powi(retry as i32);
        let millis = match strategy {
            BackoffStrategy::Fixed => return *initial_delay,
            BackoffStrategy::Exponential => grown(),
            BackoffStrategy::Random if *multiplier > 1.0 => {
                grown() * rand::thread_rng().gen_range(1.0..*multiplier)
            }
            BackoffStrategy::Random => grown(),
        };

        Duration::from_millis(millis.min(max_delay.as_millis() as f64) as u64)
    }

    /// Run `write`, repeating it after transient errors until it succeeds,
    /// fails permanently or runs out of attempts.
    pub async fn execute<F, Fut, T>(&self, mut write: F) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ConnectorResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut failures = 0;

        loop {
            let err = match write().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            failures += 1;
            if err.is_permanent() || failures >= max_attempts {
                return Err(err);
            }

            let delay = self.calculate_delay(failures - 1);
            debug!(
                failures,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error_code = err.error_code(),
                "Transient write error, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl From<RetryConfig> for RetryExecutor {
    fn from(config: RetryConfig) -> Self {
        Self::new(config)
    }
}

/// Shorthand for a retry that never happens: a single attempt.
#[must_use]
pub fn single_attempt() -> RetryExecutor {
    RetryExecutor::new(RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(strategy: BackoffStrategy, max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            strategy,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_first_success_is_returned() {
        let executor = RetryExecutor::new(RetryConfig::default());
        let call_count = AtomicUsize::new(0);

        let result = executor
            .execute(|| {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ConnectorError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let executor = RetryExecutor::new(fast(BackoffStrategy::Exponential, 3));
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let result = executor
            .execute(move || {
                let count = call_count_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(ConnectorError::TargetUnavailable {
                            message: "temporarily unavailable".to_string(),
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let executor = RetryExecutor::new(fast(BackoffStrategy::Fixed, 2));
        let call_count = AtomicUsize::new(0);

        let result: ConnectorResult<()> = executor
            .execute(|| {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::network("reset by peer")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let executor = RetryExecutor::new(fast(BackoffStrategy::Fixed, 5));
        let call_count = AtomicUsize::new(0);

        let result: ConnectorResult<i32> = executor
            .execute(|| {
                call_count.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ConnectorError::ObjectAlreadyExists {
                        identifier: "jdoe".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_never_retries() {
        let executor = single_attempt();
        let call_count = AtomicUsize::new(0);

        let _: ConnectorResult<()> = executor
            .execute(|| {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::ConnectionTimeout { timeout_secs: 5 }) }
            })
            .await;

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let executor = RetryExecutor::new(RetryConfig {
            initial_delay: Duration::from_millis(250),
            ..RetryConfig::default()
        });
        assert_eq!(executor.calculate_delay(0), Duration::from_millis(250));
        assert_eq!(executor.calculate_delay(4), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 10,
            strategy: BackoffStrategy::Exponential,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
        });
        assert_eq!(executor.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(executor.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(executor.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(executor.calculate_delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_random_delay_stays_in_band() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 10,
            strategy: BackoffStrategy::Random,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
        });
        for _ in 0..20 {
            let delay = executor.calculate_delay(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(400));
        }
    }

    #[test]
    fn test_from_backoff_params() {
        let config = RetryConfig::from_backoff_params(5, BackoffStrategy::Exponential, "500;8000;3");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_millis(8000));
        assert!((config.multiplier - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_backoff_params_ignores_garbage() {
        let config = RetryConfig::from_backoff_params(2, BackoffStrategy::Random, "abc;;0.5");
        let defaults = RetryConfig::default();
        assert_eq!(config.initial_delay, defaults.initial_delay);
        assert_eq!(config.max_delay, defaults.max_delay);
        assert!((config.multiplier - defaults.multiplier).abs() < f64::EPSILON);
    }

    #[test]
    fn test_backoff_strategy_parse() {
        assert_eq!(
            "EXPONENTIAL".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Exponential
        );
        assert!("linear".parse::<BackoffStrategy>().is_err());
    }
}
