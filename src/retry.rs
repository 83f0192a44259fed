use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::comfy::{ComfyError, ComfyErrorKind};

/// Bounded exponential backoff for idempotent, network-fragile operations.
///
/// Only the kinds in `retryable` are absorbed, and only up to `max_retries`
/// times; the last error is then returned unchanged. `Timeout` is never in
/// the default set: a timed-out request may have reached the engine, and
/// duplicate submissions are not harmless the way duplicate reads are.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub exponential_base: f64,
    pub max_delay: Duration,
    pub retryable: Vec<ComfyErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(60),
            retryable: vec![ComfyErrorKind::Connection],
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry `attempt + 1`:
    /// `min(initial_delay * exponential_base^attempt, max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis =
            self.initial_delay.as_millis() as f64 * self.exponential_base.powi(attempt as i32);
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Run `operation`, retrying retryable failures with backoff. The sleep
    /// between attempts is a tokio suspension point, so cancelling the
    /// enclosing task cancels the wait too.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ComfyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ComfyError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && self.retryable.contains(&err.kind()) => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
