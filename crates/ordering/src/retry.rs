//! Bounded retry with jittered backoff.

use std::time::Duration;

use rand::Rng;

/// How many times an order is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_jitter: Duration,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` counts every attempt, the first one
    /// included, and is raised to 1 if zero.
    pub fn new(max_attempts: u32, base_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_jitter,
        }
    }

    /// Retries immediately, without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True if another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the next attempt: the base delay plus uniform jitter.
    pub fn backoff(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return self.base_delay;
        }
        let jitter_micros = u64::try_from(self.max_jitter.as_micros()).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=jitter_micros);
        self.base_delay + Duration::from_micros(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(10), Duration::from_millis(25))
    }
}
