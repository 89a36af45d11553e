use crate::error::{CoreError, LlmError, RedditApiError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
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
    /// Retry config tuned for the Reddit API
    pub fn reddit() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Retry config for chat completion calls
    pub fn llm() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Longest wait honoured for a server-supplied retry-after
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Retry strategy based on error type
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after a server-specified delay
    RetryWithDelay(Duration),
    /// Don't retry (for permanent failures)
    NoRetry,
}

/// Determine retry strategy based on error type
pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::RedditApi(reddit_error) => match reddit_error {
            RedditApiError::RateLimitExceeded { retry_after } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            RedditApiError::ServerError { status_code } if *status_code >= 500 => {
                RetryStrategy::Retry
            }
            RedditApiError::RequestTimeout => RetryStrategy::Retry,
            RedditApiError::InvalidResponse { .. } => RetryStrategy::Retry,
            _ => RetryStrategy::NoRetry,
        },
        CoreError::Llm(llm_error) => match llm_error {
            LlmError::RateLimitExceeded { retry_after, .. } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            LlmError::ServiceUnavailable { .. } => RetryStrategy::Retry,
            LlmError::RequestTimeout { .. } => RetryStrategy::Retry,
            LlmError::InvalidResponseFormat { .. } => RetryStrategy::Retry,
            // Model output problems are retried by the caller, which owns the prompt.
            LlmError::MalformedResponse { .. } => RetryStrategy::NoRetry,
            _ => RetryStrategy::NoRetry,
        },
        CoreError::Network(reqwest_error) => {
            if reqwest_error.is_timeout() || reqwest_error.is_connect() || reqwest_error.is_request()
            {
                RetryStrategy::Retry
            } else {
                RetryStrategy::NoRetry
            }
        }
        CoreError::Timeout { .. } => RetryStrategy::Retry,
        _ => RetryStrategy::NoRetry,
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let exponential_delay = if attempt == 0 {
        Duration::from_millis(config.base_delay_ms)
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);

    (exponential_delay + Duration::from_millis(jitter)).min(max_delay)
}

/// Retry metrics for the end-of-stage summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_operations: u64,
    pub average_retry_delay_ms: f64,
}

/// Wraps operations with retry logic
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    metrics: Arc<Mutex<RetryMetrics>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(Mutex::new(RetryMetrics::default())),
        }
    }

    fn lock_metrics(&self) -> MutexGuard<'_, RetryMetrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Execute an operation with retry logic. The last error is returned
    /// unchanged so callers can still classify it.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut total_delay_ms = 0u64;
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, operation_name);
            }

            let start_time = Instant::now();
            let error = match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        let mut metrics = self.lock_metrics();
                        metrics.total_retries += attempt as u64;
                        metrics.successful_retries += 1;
                        metrics.average_retry_delay_ms = (metrics.average_retry_delay_ms
                            * (metrics.successful_retries - 1) as f64
                            + total_delay_ms as f64)
                            / metrics.successful_retries as f64;

                        info!(
                            "Operation {} succeeded after {} retries (total delay: {}ms)",
                            operation_name, attempt, total_delay_ms
                        );
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            debug!(
                "Attempt {} failed for {} after {:?}: {}",
                attempt + 1,
                operation_name,
                start_time.elapsed(),
                error
            );

            let has_attempts_left = attempt + 1 < max_attempts;
            let delay = match get_retry_strategy(&error) {
                RetryStrategy::Retry if has_attempts_left => calculate_delay(attempt, &self.config),
                RetryStrategy::RetryWithDelay(delay) if has_attempts_left => {
                    delay.min(self.config.max_delay())
                }
                strategy => {
                    let mut metrics = self.lock_metrics();
                    metrics.total_retries += attempt as u64;
                    metrics.failed_operations += 1;
                    drop(metrics);

                    if strategy == RetryStrategy::NoRetry {
                        debug!("Not retrying {} due to error type: {}", operation_name, error);
                    } else {
                        warn!(
                            "Operation {} failed after {} attempts with total delay of {}ms: {}",
                            operation_name,
                            attempt + 1,
                            total_delay_ms,
                            error
                        );
                    }
                    return Err(error);
                }
            };

            total_delay_ms += delay.as_millis() as u64;
            info!("Retrying {} in {:?} due to: {}", operation_name, delay, error);
            sleep(delay).await;
            attempt += 1;
        }
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        self.lock_metrics().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_retry_config_presets() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.jitter_factor <= 1.0);

        let reddit = RetryConfig::reddit();
        assert_eq!(reddit.base_delay_ms, 2000);
        assert_eq!(reddit.jitter_factor, 0.2);
    }

    #[test]
    fn test_retry_strategy_for_errors() {
        let rate_limit = CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
        assert_eq!(
            get_retry_strategy(&rate_limit),
            RetryStrategy::RetryWithDelay(Duration::from_secs(60))
        );

        let auth = CoreError::RedditApi(RedditApiError::AuthenticationFailed {
            reason: "bad secret".to_string(),
        });
        assert_eq!(get_retry_strategy(&auth), RetryStrategy::NoRetry);

        let server = CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 });
        assert_eq!(get_retry_strategy(&server), RetryStrategy::Retry);

        let unavailable = CoreError::Llm(LlmError::ServiceUnavailable {
            provider: "openrouter".to_string(),
            status_code: 502,
        });
        assert_eq!(get_retry_strategy(&unavailable), RetryStrategy::Retry);

        let malformed = CoreError::Llm(LlmError::malformed("not json"));
        assert_eq!(get_retry_strategy(&malformed), RetryStrategy::NoRetry);

        let credits = CoreError::Llm(LlmError::InsufficientCredits {
            provider: "openrouter".to_string(),
        });
        assert_eq!(get_retry_strategy(&credits), RetryStrategy::NoRetry);

        assert_eq!(
            get_retry_strategy(&CoreError::Timeout { seconds: 180 }),
            RetryStrategy::Retry
        );
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..Default::default()
        };

        assert_eq!(calculate_delay(0, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(2000));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(4000));
        assert_eq!(calculate_delay(3, &config), Duration::from_millis(8000));
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(10000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..20 {
            let delay = calculate_delay(1, &config);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(3000));
        }
    }

    #[tokio::test]
    async fn test_retry_executor_success_on_first_attempt() {
        let executor = RetryExecutor::new(quick_config(3));

        let result = executor
            .execute("op", || async { Ok::<i32, CoreError>(42) })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(executor.get_metrics(), RetryMetrics::default());
    }

    #[tokio::test]
    async fn test_retry_executor_success_after_retries() {
        let executor = RetryExecutor::new(quick_config(3));
        let attempts = Arc::new(Mutex::new(0));

        let result = executor
            .execute("op", || {
                let attempts = attempts.clone();
                async move {
                    let mut count = attempts.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(CoreError::RedditApi(RedditApiError::ServerError {
                            status_code: 500,
                        }))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        let metrics = executor.get_metrics();
        assert_eq!(metrics.total_retries, 2);
        assert_eq!(metrics.successful_retries, 1);
    }

    #[tokio::test]
    async fn test_retry_executor_returns_original_error() {
        let executor = RetryExecutor::new(quick_config(3));
        let attempts = Arc::new(Mutex::new(0));

        let result = executor
            .execute("op", || {
                let attempts = attempts.clone();
                async move {
                    *attempts.lock().unwrap() += 1;
                    Err::<i32, CoreError>(CoreError::Llm(LlmError::InvalidApiKey {
                        provider: "openrouter".to_string(),
                    }))
                }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            CoreError::Llm(LlmError::InvalidApiKey { .. })
        ));
        assert_eq!(*attempts.lock().unwrap(), 1);
        assert_eq!(executor.get_metrics().failed_operations, 1);
    }

    #[tokio::test]
    async fn test_retry_executor_gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(quick_config(2));
        let attempts = Arc::new(Mutex::new(0));

        let result = executor
            .execute("op", || {
                let attempts = attempts.clone();
                async move {
                    *attempts.lock().unwrap() += 1;
                    Err::<i32, CoreError>(CoreError::Timeout { seconds: 1 })
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), CoreError::Timeout { .. }));
        assert_eq!(*attempts.lock().unwrap(), 2);
        let metrics = executor.get_metrics();
        assert_eq!(metrics.total_retries, 1);
        assert_eq!(metrics.failed_operations, 1);
    }
}
