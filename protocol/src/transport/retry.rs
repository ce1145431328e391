//! # Retry & Backoff
//!
//! The transport retries only retryable failures (timeouts, transient
//! connection loss, saturated write queues) and only within the policy's
//! attempt budget. Non-retryable errors propagate to the caller on the
//! first occurrence.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY,
};
use crate::error::A2aError;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every attempt.
    Fixed,
    /// Delay grows proportionally to the attempt number.
    Linear,
    /// Delay doubles every attempt.
    Exponential,
}

/// A retry policy: attempt budget plus backoff shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff shape.
    pub backoff_strategy: BackoffStrategy,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to add up to 50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            backoff_strategy: BackoffStrategy::Exponential,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY.as_millis() as u64,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether a failure on attempt `attempt` (1-based) warrants another try.
    pub fn should_retry(&self, attempt: u32, error: &A2aError) -> bool {
        attempt < self.max_attempts && error.retryable()
    }

    /// Delay to sleep before retry number `attempt` (1-based: the delay
    /// after the first failure is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay_ms;
        let raw = match self.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                base.saturating_mul(1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX))
            }
        };
        let capped = raw.min(self.max_delay_ms);

        let final_ms = if self.jitter && capped > 0 {
            let spread = capped / 2;
            capped - spread / 2 + rand::thread_rng().gen_range(0..=spread)
        } else {
            capped
        };
        Duration::from_millis(final_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            backoff_strategy: backoff,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter: false,
        }
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let p = policy(BackoffStrategy::Fixed);
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(3), Duration::from_millis(100));
    }

    #[test]
    fn linear_backoff_grows_proportionally() {
        let p = policy(BackoffStrategy::Linear);
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        // 100 * 2^9 far exceeds the cap.
        assert_eq!(p.delay_for(10), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_half_spread() {
        let p = RetryPolicy {
            jitter: true,
            ..policy(BackoffStrategy::Fixed)
        };
        for _ in 0..50 {
            let d = p.delay_for(1).as_millis() as u64;
            assert!((75..=150).contains(&d), "jittered delay {} out of range", d);
        }
    }

    #[test]
    fn retry_classification_honours_budget_and_kind() {
        let p = policy(BackoffStrategy::Fixed);
        let timeout = A2aError::Timeout {
            elapsed_ms: 1,
            timeout_ms: 1,
        };
        let validation = A2aError::Validation("bad".into());

        assert!(p.should_retry(1, &timeout));
        assert!(p.should_retry(3, &timeout));
        assert!(!p.should_retry(4, &timeout), "budget exhausted");
        assert!(!p.should_retry(1, &validation), "non-retryable kind");
    }

    #[test]
    fn config_round_trip() {
        let p = RetryPolicy::default();
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"backoffStrategy\":\"exponential\""));
        let recovered: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(recovered, p);
    }
}
