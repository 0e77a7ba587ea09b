//! Exponential backoff retry, bounded by a configured attempt count. Only
//! [`BackendError::is_retryable`] errors are retried; everything else surfaces
//! immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::BackendError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub factor: f64,
    pub max_ms: u64,
    pub retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_ms: 250,
            factor: 2.0,
            max_ms: 10_000,
            retries: 3,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self.base_ms as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(ms.min(self.max_ms as f64) as u64)
    }

    /// Runs `op` up to `retries + 1` times. Retries only on a retryable error;
    /// the first non-retryable error or exhausted attempts return immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    tracing::warn!(attempt, error = %e, "retrying backend call");
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
