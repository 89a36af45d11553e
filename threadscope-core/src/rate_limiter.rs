use crate::error::CoreError;
use crate::retry::{RetryConfig, RetryExecutor, RetryMetrics};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// Enforces a fixed minimum interval between consecutive calls, measured
/// from the end of one call to the start of the next.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Waits until the interval since the previous call has elapsed, then
    /// records the current call. Returns the time spent waiting.
    pub async fn wait_turn(&self) -> Duration {
        let mut last_call = self.last_call.lock().await;
        let mut waited = Duration::ZERO;

        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                debug!("Pacing outbound call, waiting {:?}", waited);
                sleep(waited).await;
            }
        }

        *last_call = Some(Instant::now());
        waited
    }

    /// Marks the current call as finished; the next call waits from here.
    pub async fn finish(&self) {
        *self.last_call.lock().await = Some(Instant::now());
    }
}

/// Outbound call wrapper: pacing, per-call timeout and retry with backoff.
///
/// Every attempt (including retries) waits on the pacer, and every attempt is
/// bounded by the configured timeout.
#[derive(Debug)]
pub struct RateLimitedClient {
    pacer: RequestPacer,
    retry: RetryExecutor,
    call_timeout: Duration,
}

impl RateLimitedClient {
    pub fn new(min_interval: Duration, call_timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            pacer: RequestPacer::new(min_interval),
            retry: RetryExecutor::new(retry),
            call_timeout,
        }
    }

    pub fn metrics(&self) -> RetryMetrics {
        self.retry.get_metrics()
    }

    pub async fn call<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let pacer = &self.pacer;
        let operation = &operation;
        let call_timeout = self.call_timeout;

        self.retry
            .execute(operation_name, || async move {
                pacer.wait_turn().await;
                let outcome = timeout(call_timeout, operation()).await;
                pacer.finish().await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(CoreError::Timeout {
                        seconds: call_timeout.as_secs().max(1),
                    }),
                }
            })
            .await
    }
}
