use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Backoff schedule for an operation that talks to a flaky dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Model calls: few retries, long waits. Providers shed load with 429/503.
    pub const MODEL: Self = Self {
        max_retries: 2,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(4),
    };

    /// Refunds: more attempts, short waits. The contention is a busy SQLite
    /// writer, and the caller is holding a request open.
    pub const REFUND: Self = Self {
        max_retries: 4,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(400),
    };

    /// Wait before retry number `attempt` (0-based): doubling, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, or the policy
/// runs out of retries. `op` names the operation in logs.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, op: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if !e.is_transient() || attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    op,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
