//! Retry policy for transient provider errors.
//!
//! Grounded on `durable/src/reliability/retry.rs`'s `RetryPolicy` almost verbatim
//! (exponential backoff with jitter, `delay_for_attempt`/`should_retry`/
//! `has_attempts_remaining`). The one behavioral difference from the donor: step
//! handlers cap backoff at the poll interval rather than an independent
//! `max_interval`, so a retrying step never waits longer between attempts than
//! it would between ordinary wait-condition polls.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    /// Exponential backoff capped at `poll_interval`, as required for transient
    /// provider errors encountered during a step's poll loop.
    pub fn capped_at_poll_interval(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: Duration::from_millis(500),
            max_interval: poll_interval,
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let retry_num = attempt - 1;
        let base =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::capped_at_poll_interval(Duration::from_secs(30), 5)
    }
}
