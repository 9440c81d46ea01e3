use std::time::Duration;

use reddalert_core::SourceError;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior on source calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Retry config tuned for the Reddit API: slower base delay and 20%
    /// jitter to prevent thundering herd.
    pub fn reddit() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff.
    Retry,
    /// Retry after a source-specified delay (429 retry-after).
    RetryWithDelay(Duration),
    /// Permanent failure, surface immediately.
    NoRetry,
}

pub fn retry_strategy(error: &SourceError) -> RetryStrategy {
    match error {
        SourceError::RateLimited { retry_after } => {
            RetryStrategy::RetryWithDelay(Duration::from_secs(retry_after.unwrap_or(60)))
        }
        SourceError::ServerError { .. }
        | SourceError::RequestTimeout
        | SourceError::InvalidResponse { .. }
        | SourceError::Network { .. } => RetryStrategy::Retry,
        SourceError::SubredditNotFound { .. }
        | SourceError::SubredditForbidden { .. }
        | SourceError::AuthenticationFailed { .. }
        | SourceError::MalformedItem { .. } => RetryStrategy::NoRetry,
    }
}

/// Exponential backoff with jitter.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponential = if attempt == 0 {
        config.base_delay_ms
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        ((config.base_delay_ms as f64 * multiplier) as u64).min(config.max_delay_ms)
    };

    let jitter_range = (exponential as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);

    Duration::from_millis((exponential + jitter).min(config.max_delay_ms))
}

/// Wraps source operations with classification-aware retries.
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, SourceError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                debug!("retry attempt {} for {}", attempt, operation_name);
            }

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    let should_retry = attempt + 1 < self.config.max_attempts;
                    match retry_strategy(&error) {
                        RetryStrategy::NoRetry => {
                            debug!("not retrying {}: {}", operation_name, error);
                            return Err(error);
                        }
                        RetryStrategy::Retry if should_retry => {
                            let delay = calculate_delay(attempt, &self.config);
                            info!("retrying {} in {:?}: {}", operation_name, delay, error);
                            last_error = Some(error);
                            sleep(delay).await;
                        }
                        RetryStrategy::RetryWithDelay(delay) if should_retry => {
                            info!(
                                "retrying {} after source-specified {:?}: {}",
                                operation_name, delay, error
                            );
                            last_error = Some(error);
                            sleep(delay).await;
                        }
                        _ => {
                            last_error = Some(error);
                            break;
                        }
                    }
                }
            }
        }

        let error = last_error.unwrap_or(SourceError::RequestTimeout);
        warn!(
            "{} failed after {} attempts: {}",
            operation_name, self.config.max_attempts, error
        );
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn strategy_classifies_errors() {
        assert_eq!(
            retry_strategy(&SourceError::RateLimited {
                retry_after: Some(42)
            }),
            RetryStrategy::RetryWithDelay(Duration::from_secs(42))
        );
        assert_eq!(
            retry_strategy(&SourceError::ServerError { status_code: 502 }),
            RetryStrategy::Retry
        );
        assert_eq!(
            retry_strategy(&SourceError::SubredditNotFound {
                subreddit: "gone".to_string()
            }),
            RetryStrategy::NoRetry
        );
        assert_eq!(
            retry_strategy(&SourceError::SubredditForbidden {
                subreddit: "hidden".to_string()
            }),
            RetryStrategy::NoRetry
        );
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(calculate_delay(0, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(2000));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(4000));
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(10000));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.5,
        };
        for _ in 0..20 {
            let delay = calculate_delay(1, &config);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(3000));
        }
    }

    #[tokio::test]
    async fn executor_retries_transient_errors() {
        let executor = RetryExecutor::new(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = executor
            .execute("listing", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SourceError::ServerError { status_code: 500 })
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn executor_does_not_retry_permanent_errors() {
        let executor = RetryExecutor::new(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<(), _> = executor
            .execute("listing", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SourceError::SubredditForbidden {
                        subreddit: "private_sub".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(SourceError::SubredditForbidden { .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executor_gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<(), _> = executor
            .execute("listing", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SourceError::ServerError { status_code: 503 })
                }
            })
            .await;

        assert!(matches!(result, Err(SourceError::ServerError { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
