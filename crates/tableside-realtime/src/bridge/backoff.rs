//! Decorrelated-jitter reconnect backoff.
//!
//! Each delay is drawn uniformly from `[base, previous * 3]` and capped at
//! `max`, which spreads reconnect attempts from many nodes after a shared
//! outage.

use std::time::Duration;

use rand::Rng;

use tableside_core::config::RetryConfig;

/// Stateful backoff calculator.
#[derive(Debug, Clone)]
pub struct DecorrelatedJitter {
    base_ms: u64,
    max_ms: u64,
    previous_ms: u64,
}

impl DecorrelatedJitter {
    /// Create a calculator from retry bounds.
    pub fn new(config: &RetryConfig) -> Self {
        let base_ms = config.base_delay_ms.max(1);
        let max_ms = config.max_delay_ms.max(base_ms);
        Self {
            base_ms,
            max_ms,
            previous_ms: base_ms,
        }
    }

    /// Next delay to sleep before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let upper = self.previous_ms.saturating_mul(3).max(self.base_ms);
        let drawn = rand::rng().random_range(self.base_ms..=upper);
        self.previous_ms = drawn.min(self.max_ms);
        Duration::from_millis(self.previous_ms)
    }

    /// The largest delay, for failures that retrying soon will not fix.
    pub fn ceiling(&mut self) -> Duration {
        self.previous_ms = self.max_ms;
        Duration::from_millis(self.max_ms)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.previous_ms = self.base_ms;
    }
}
