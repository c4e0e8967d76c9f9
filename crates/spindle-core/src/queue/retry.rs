//! Retry policy: decides whether a failed attempt is retried and how long to wait.

use std::fmt;
use std::time::Duration;

use crate::domain::ActionError;

/// Retry policy for failed attempts.
///
/// Implementations are pure: the answer depends only on the arguments. All
/// per-task state (attempt counts, last error) lives on the task record.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Should the task be attempted again after `attempts` attempts, the last
    /// of which failed with `error`?
    fn should_retry(&self, attempts: u32, error: &ActionError) -> bool;

    /// Delay before the next attempt, given `attempts` attempts so far (1-indexed).
    fn backoff_delay(&self, attempts: u32) -> Duration;
}

/// Exponential backoff capped at a ceiling.
///
/// delay(n) = min(base_delay * multiplier^(n - 1), max_delay)
///
/// Example with base_delay=100ms, multiplier=2.0, max_delay=1s:
/// - attempt 1 (first failure): 100ms
/// - attempt 2: 200ms
/// - attempt 3: 400ms
/// - attempt 4: 800ms
/// - attempt 5: 1s
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Total attempts allowed, the first one included. 1 means no retries.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Ceiling for any delay.
    pub max_delay: Duration,

    pub multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(30))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempts: u32, error: &ActionError) -> bool {
        error.is_retryable() && attempts < self.max_attempts
    }

    fn backoff_delay(&self, attempts: u32) -> Duration {
        // Past ~1000 doublings the f64 is infinite anyway; keep powi's input small.
        let exponent = attempts.saturating_sub(1).min(1023) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> ExponentialBackoff {
        ExponentialBackoff::new(3, Duration::from_millis(100), Duration::from_secs(1))
    }

    #[rstest]
    #[case::first(1, 100)]
    #[case::second(2, 200)]
    #[case::third(3, 400)]
    #[case::fourth(4, 800)]
    #[case::capped(5, 1000)]
    #[case::far_past_cap(40, 1000)]
    fn delay_doubles_until_capped(#[case] attempts: u32, #[case] expected_ms: u64) {
        assert_eq!(
            policy().backoff_delay(attempts),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn delay_is_non_decreasing_and_never_exceeds_max() {
        let p = policy();
        let mut previous = Duration::ZERO;
        for attempts in 0..=5000 {
            let d = p.backoff_delay(attempts);
            assert!(d >= previous, "delay shrank at attempt {attempts}");
            assert!(d <= p.max_delay);
            previous = d;
        }
        assert_eq!(p.backoff_delay(u32::MAX), p.max_delay);
    }

    #[test]
    fn attempt_zero_uses_base_delay() {
        assert_eq!(policy().backoff_delay(0), Duration::from_millis(100));
    }

    #[rstest]
    #[case::after_first(1, true)]
    #[case::after_second(2, true)]
    #[case::budget_spent(3, false)]
    #[case::over_budget(4, false)]
    fn retries_while_under_max_attempts(#[case] attempts: u32, #[case] retry: bool) {
        let err = ActionError::transient("flaky");
        assert_eq!(policy().should_retry(attempts, &err), retry);
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let p = ExponentialBackoff::new(1, Duration::from_millis(10), Duration::from_secs(1));
        assert!(!p.should_retry(1, &ActionError::transient("flaky")));
    }

    #[test]
    fn non_retryable_errors_are_not_retried() {
        let err = ActionError::permanent("invalid payload");
        assert!(!policy().should_retry(1, &err));
    }

    #[test]
    fn custom_multiplier_is_applied() {
        let p = policy().with_multiplier(3.0);
        assert_eq!(p.backoff_delay(2), Duration::from_millis(300));
        assert_eq!(p.backoff_delay(3), Duration::from_millis(900));
    }
}
