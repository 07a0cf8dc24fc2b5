//! Retry with exponential backoff.
//!
//! Retries only transport-class errors (connection refused, timeout,
//! connection reset) and never 4xx responses. On 5xx the caller decides;
//! this layer does not retry automatically because business services
//! already wrap the call in the circuit breaker.

use std::time::Duration;

use tracing::warn;

/// Up to `max_attempts` tries, exponential wait with multiplier 1 bounded
/// by `[min_wait, max_wait]`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, min_wait_secs: u64, max_wait_secs: u64) -> Self {
        Self {
            max_attempts,
            min_wait: Duration::from_secs(min_wait_secs),
            max_wait: Duration::from_secs(max_wait_secs),
        }
    }

    /// Preset for data-collaborator calls.
    pub fn data_service() -> Self {
        Self::new(3, 1, 5)
    }

    /// Preset for notification delivery (more lenient).
    pub fn notification() -> Self {
        Self::new(5, 2, 30)
    }

    /// Sleep before the given retry attempt (0-indexed): `2^attempt`
    /// seconds clamped to `[min_wait, max_wait]`.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = 1u64
            .checked_shl(attempt as u32)
            .map(Duration::from_secs)
            .unwrap_or(self.max_wait);
        exp.clamp(self.min_wait, self.max_wait)
    }

    /// Retry `f` while `is_retryable` holds, up to `max_attempts` total
    /// attempts.
    pub async fn run<F, Fut, T, E>(
        &self,
        is_retryable: impl Fn(&E) -> bool,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts || !is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transport error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
