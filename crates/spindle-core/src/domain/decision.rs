//! Decision model: what happens to a task after a failed attempt.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::errors::ActionError;
use crate::queue::RetryPolicy;

/// The next step for a task whose attempt just failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Put the task back in `pending`, eligible again after `delay`.
    Retry { delay: Duration, reason: String },

    /// Give up: the task becomes `Failed`.
    Fail { reason: String },
}

/// Turns a failed attempt into a [`Decision`].
///
/// The retry policy answers "whether" and "how long"; the decider adds
/// jitter on top of the policy's delay so that a burst of failures does not
/// come back as a burst of retries. Jitter only lengthens the delay and never
/// pushes it past `max_delay`.
#[derive(Debug, Clone)]
pub struct Decider {
    policy: Arc<dyn RetryPolicy>,
    jitter: f64,
    max_delay: Duration,
}

impl Decider {
    /// `jitter` is the fraction of the backoff delay that may be added at random.
    pub fn new(policy: Arc<dyn RetryPolicy>, jitter: f64, max_delay: Duration) -> Self {
        Self {
            policy,
            jitter: jitter.clamp(0.0, 1.0),
            max_delay,
        }
    }

    pub fn policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.policy
    }

    /// Decide what to do after attempt number `attempts` failed with `error`.
    ///
    /// The policy has the final say for every error kind.
    pub fn decide(&self, attempts: u32, error: &ActionError) -> Decision {
        if !self.policy.should_retry(attempts, error) {
            let reason = if error.is_retryable() {
                format!("retry budget exhausted after {attempts} attempt(s)")
            } else {
                format!("error is not retryable: {error}")
            };
            return Decision::Fail { reason };
        }

        let base = self.policy.backoff_delay(attempts);
        let delay = self.jittered(base);
        Decision::Retry {
            delay,
            reason: format!("attempt {} after {:?}", attempts + 1, delay),
        }
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter == 0.0 || base.is_zero() || base >= self.max_delay {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(1.0 + extra).min(self.max_delay)
    }
}
