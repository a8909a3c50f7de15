//! RetryPolicy - bounded exponential backoff

use contracts::RetryConfig;

/// In-memory retry bookkeeping of one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub failed_attempts: u32,
    pub next_retry_time_ms: i64,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff after `failed_attempts` failures (1-based)
    pub fn backoff_ms(&self, failed_attempts: u32) -> u64 {
        let exponent = failed_attempts.saturating_sub(1).min(63);
        let backoff = self
            .config
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_backoff_ms);
        backoff.max(self.config.min_retry_delay_ms)
    }

    /// Delay before the next attempt; a server hint wins over the backoff
    pub fn next_delay_ms(&self, failed_attempts: u32, retry_after_ms: Option<i64>) -> u64 {
        match retry_after_ms {
            Some(hint) => u64::try_from(hint)
                .unwrap_or(0)
                .max(self.config.min_retry_delay_ms),
            None => self.backoff_ms(failed_attempts),
        }
    }

    /// Whether a call with `failed_attempts` failures must be dropped
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        self.config
            .max_attempts
            .is_some_and(|max| failed_attempts >= max)
    }

    /// Record one more failure at `now_ms`
    pub fn next_state(
        &self,
        previous: RetryState,
        now_ms: i64,
        retry_after_ms: Option<i64>,
    ) -> RetryState {
        let failed_attempts = previous.failed_attempts.saturating_add(1);
        let delay = self.next_delay_ms(failed_attempts, retry_after_ms);
        RetryState {
            failed_attempts,
            next_retry_time_ms: now_ms.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
