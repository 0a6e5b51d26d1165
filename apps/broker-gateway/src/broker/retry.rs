//! Retry policy with exponential backoff for backend calls.
//!
//! One [`RetryPolicy`] instance is shared by every call to a given
//! backend. The policy decides which [`ErrorClass`]es are retry-eligible
//! and how long attempt `n` backs off:
//! `min(base_delay * 2^(n-1), max_delay)` with ± `jitter_fraction`
//! randomization.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::ErrorClass;

/// Retry policy configuration for backend calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default: 3).
    pub max_attempts: u32,
    /// Backoff before the first retry (default: 250ms).
    pub base_delay: Duration,
    /// Ceiling for any single backoff (default: 10s).
    pub max_delay: Duration,
    /// Jitter factor applied to each backoff (default: 0.2 = ±20%).
    pub jitter_fraction: f64,
    /// Failure classes eligible for transparent retries (default:
    /// `Transient` and `RateLimited`). `AuthExpired` is handled by the
    /// executor's one-shot re-auth path regardless of this set, and
    /// `Fatal` should never be listed.
    pub retryable: Vec<ErrorClass>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.2,
            retryable: vec![ErrorClass::Transient, ErrorClass::RateLimited],
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom settings and the default retryable set.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter_fraction: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_fraction,
            ..Self::default()
        }
    }

    /// Policy with jitter disabled, for deterministic tests.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_fraction = 0.0;
        self
    }

    /// Whether the policy permits retrying a failure of this class.
    #[must_use]
    pub fn is_retryable(&self, class: ErrorClass) -> bool {
        self.retryable.contains(&class)
    }

    /// Backoff duration before retrying after failed attempt `attempt`
    /// (1-based), with jitter applied.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as u64;
        let scaled = base_ms.saturating_mul(1_u64 << exponent);
        let capped = scaled.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(apply_jitter(capped, self.jitter_fraction))
    }
}

/// Randomize a backoff within [ms * (1 - jitter), ms * (1 + jitter)].
fn apply_jitter(ms: u64, jitter_fraction: f64) -> u64 {
    if jitter_fraction <= 0.0 || ms == 0 {
        return ms;
    }

    let mut rng = rand::rng();
    let range = ms as f64 * jitter_fraction;
    let min = (ms as f64 - range).max(0.0);
    let max = ms as f64 + range;

    rng.random_range(min..=max) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert!((policy.jitter_fraction - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn backoff_doubles_without_jitter() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_secs(30),
            0.0,
        );

        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn backoff_respects_max_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 0.0);

        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(4));
        // 8s capped to 5s, and everything after
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.backoff_for_attempt(9), Duration::from_secs(5));
    }

    #[test]
    fn backoff_survives_huge_attempt_numbers() {
        let policy = RetryPolicy::new(
            u32::MAX,
            Duration::from_millis(100),
            Duration::from_secs(5),
            0.0,
        );
        // 2^63 would overflow; the shift is clamped and the cap applies.
        assert_eq!(policy.backoff_for_attempt(64), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_secs(30),
            0.2,
        );

        for _ in 0..100 {
            let backoff = policy.backoff_for_attempt(1);
            assert!(
                backoff >= Duration::from_millis(80) && backoff <= Duration::from_millis(120),
                "backoff {backoff:?} not in expected range 80-120ms"
            );
        }
    }

    #[test]
    fn retryable_classes() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(ErrorClass::Transient));
        assert!(policy.is_retryable(ErrorClass::RateLimited));
        assert!(!policy.is_retryable(ErrorClass::AuthExpired));
        assert!(!policy.is_retryable(ErrorClass::Fatal));
    }

    #[test]
    fn custom_retryable_set_is_honored() {
        let policy = RetryPolicy {
            retryable: vec![ErrorClass::Transient],
            ..Default::default()
        };
        assert!(policy.is_retryable(ErrorClass::Transient));
        assert!(!policy.is_retryable(ErrorClass::RateLimited));
    }
}
