//! Retry and backoff policy for pending operations

use std::time::Duration;

/// Attempts before an operation is marked permanently failed
pub const MAX_RETRY_COUNT: u32 = 3;

/// Base delay for exponential backoff
pub const RETRY_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry_count: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            max_retry_count,
            retry_delay,
        }
    }

    /// Delay before the next attempt, given the failures recorded so far
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2_u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }

    /// Whether `retry_count` failures exhaust the policy
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retry_count
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRY_COUNT, Duration::from_millis(RETRY_DELAY_MS))
    }
}
