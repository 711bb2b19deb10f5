//! Bounded exponential-backoff retry policy.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for retrying one guarded call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; also the lower bound.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Add up to 25% random extra delay (still capped at `max_delay`).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt - 1)`, clamped to `[base_delay, max_delay]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        raw.clamp(self.base_delay, self.max_delay.max(self.base_delay))
    }

    /// [`delay_for_attempt`](Self::delay_for_attempt) plus optional jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }
        let spread_ms = (delay.as_millis() / 4) as u64;
        let extra = Duration::from_millis(rand::rng().random_range(0..=spread_ms));
        (delay + extra).min(self.max_delay.max(self.base_delay))
    }
}
