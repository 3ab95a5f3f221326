//! Exponential backoff for reconnection scheduling.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff parameters: `initial * multiplier^attempt`, capped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    /// Growth factor applied per consecutive failure.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Upper bound on the delay, in milliseconds.
    #[serde(default = "default_ceiling_ms")]
    pub ceiling_ms: u64,
}

fn default_initial_ms() -> u64 {
    2_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_ceiling_ms() -> u64 {
    60_000
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            multiplier: default_multiplier(),
            ceiling_ms: default_ceiling_ms(),
        }
    }
}

impl BackoffPolicy {
    /// The delay before the given retry attempt (0-indexed).
    ///
    /// Overflowing intermediate values saturate to the ceiling, so the delay
    /// is non-decreasing across attempts.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self
            .multiplier
            .checked_pow(attempt)
            .map(u64::from)
            .and_then(|factor| self.initial_ms.checked_mul(factor))
            .unwrap_or(self.ceiling_ms)
            .min(self.ceiling_ms);
        Duration::from_millis(ms)
    }
}

/// Stateful backoff counter owned by one binding controller.
///
/// Each controller owns its own counter, so one provider's crash loop never
/// affects another's retry cadence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Create a counter at the initial delay.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// The delay to wait before the next retry, advancing the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Reset to the initial delay after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures recorded since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_non_decreasing_to_ceiling() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = policy.delay_for(attempt);
            assert!(
                delay >= previous,
                "attempt {attempt}: delay {delay:?} decreased from {previous:?}"
            );
            assert!(delay <= Duration::from_millis(policy.ceiling_ms));
            previous = delay;
        }
        assert_eq!(policy.delay_for(39), Duration::from_millis(60_000));
    }

    #[test]
    fn test_default_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_overflow_saturates_to_ceiling() {
        let policy = BackoffPolicy {
            initial_ms: u64::MAX,
            multiplier: u32::MAX,
            ceiling_ms: 30_000,
        };
        assert_eq!(policy.delay_for(200), Duration::from_millis(30_000));
    }
}
