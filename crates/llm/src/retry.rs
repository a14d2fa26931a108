//! Per-call deadline and bounded retry for any [`GenerationPort`].
//!
//! Transient failures (including an attempt that exceeds the deadline) are
//! retried up to `max_retries` more times with exponential back-off, or after
//! the provider's own `Retry-After` hint when it gives one. No single delay
//! exceeds the per-attempt timeout. Fatal errors and
//! cancellation return immediately. Callers never see the intermediate
//! failures of a call that eventually succeeds.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{ChatMessage, GenerationError, GenerationPort, ModelSettings, RetryPolicy};
use tracing::{info, warn};

/// Wraps a port with a per-attempt timeout and a retry ceiling.
pub struct RetryingGenerator<P> {
    inner: P,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl<P: GenerationPort> RetryingGenerator<P> {
    pub fn new(inner: P, timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            timeout,
            max_retries,
            backoff,
        }
    }

    /// Uses the timeout, retry count and back-off from `settings`.
    pub fn from_settings(inner: P, settings: &ModelSettings) -> Self {
        Self::new(
            inner,
            settings.timeout(),
            settings.max_retries,
            settings.retry_backoff(),
        )
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Delay before attempt `attempt + 1`, doubling from the base back-off.
    fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }
}

#[async_trait]
impl<P: GenerationPort> GenerationPort for RetryingGenerator<P> {
    async fn generate(&self, context: &[ChatMessage]) -> Result<String, GenerationError> {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, self.inner.generate(context)).await
            {
                Ok(result) => result,
                Err(_) => Err(GenerationError::transient(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f64()
                ))),
            };

            let err = match result {
                Ok(text) => {
                    if attempt > 1 {
                        info!(attempt, "generation succeeded after retry");
                    }
                    return Ok(text);
                }
                Err(err) => err,
            };

            match err.retry_policy() {
                RetryPolicy::Retryable { after } if attempt < max_attempts => {
                    let delay = after
                        .unwrap_or_else(|| self.backoff_after(attempt))
                        .min(self.timeout);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient generation failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(err),
            }
        }
    }
}
