//! Retry controller: bounded exponential backoff for faulted attempts.
//!
//! Only unexpected faults are retried. Declared domain failures are terminal
//! and never reach this module.

use std::time::Duration;

use crate::config::RetryConfig;

/// What to do after a faulted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run attempt `attempt` after `delay`.
    Retry {
        /// Index of the next attempt (`retry_count` after the decision).
        attempt: u32,
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Budget spent; fail terminally.
    Exhausted,
}

/// Retry ceiling and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from explicit values.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Build a policy from configuration.
    #[must_use]
    pub const fn from_config(cfg: &RetryConfig) -> Self {
        Self::new(
            cfg.max_retries,
            Duration::from_millis(cfg.base_delay_ms),
            Duration::from_millis(cfg.max_delay_ms),
        )
    }

    /// Maximum number of retries after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `min(base * 2^n, max)`, saturating instead of overflowing.
    #[must_use]
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Decide the fate of a faulted attempt whose index was `retry_count`.
    #[must_use]
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count >= self.max_retries {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            attempt: retry_count + 1,
            delay: self.backoff(retry_count),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn default_sequence_is_30_60_120_then_exhausted() {
        let p = RetryPolicy::new(3, secs(30), secs(300));
        assert_eq!(p.decide(0), RetryDecision::Retry { attempt: 1, delay: secs(30) });
        assert_eq!(p.decide(1), RetryDecision::Retry { attempt: 2, delay: secs(60) });
        assert_eq!(p.decide(2), RetryDecision::Retry { attempt: 3, delay: secs(120) });
        assert_eq!(p.decide(3), RetryDecision::Exhausted);
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy::new(10, secs(30), secs(300));
        assert_eq!(p.backoff(3), secs(240));
        assert_eq!(p.backoff(4), secs(300));
        assert_eq!(p.backoff(40), secs(300));
    }

    #[test]
    fn zero_retries_never_retries() {
        let p = RetryPolicy::new(0, secs(1), secs(1));
        assert_eq!(p.decide(0), RetryDecision::Exhausted);
    }
}
