//! Fixed-budget retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub budget: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    pub fn new(budget: u32, backoff_base_ms: u64, backoff_max_ms: u64) -> Self {
        Self {
            budget,
            backoff_base_ms,
            backoff_max_ms,
        }
    }

    /// No backoff between attempts.
    pub fn immediate(budget: u32) -> Self {
        Self::new(budget, 0, 0)
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.budget => {
                    let delay = self.backoff(retry);
                    warn!(
                        target_op = label,
                        attempt = retry + 1,
                        error = %e,
                        "Transient failure, retrying in {}ms",
                        delay.as_millis()
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    retry += 1;
                }
                Err(e) => {
                    debug!(target_op = label, attempts = retry + 1, kind = e.kind(), "Giving up");
                    return Err(e);
                }
            }
        }
    }
}
