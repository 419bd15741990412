//! Retry/backoff policy
//!
//! A pure function from attempt count to re-enqueue delay. The delay is
//! monotonic non-decreasing in the attempt count for both strategies, so a
//! job can never back off less after failing more.

use crate::config::{RetryConfig, RetryStrategy};
use std::time::Duration;

/// Delay policy applied between failed attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    base: Duration,
    multiplier: f64,
    max: Duration,
}

impl RetryPolicy {
    /// Builds a policy from the retry configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            strategy: config.strategy,
            base: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Fixed delay between attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            base: delay,
            multiplier: 1.0,
            max: delay,
        }
    }

    /// Exponential backoff from `base`, growing by `multiplier` per
    /// attempt, capped at `max`
    pub fn exponential(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            base,
            multiplier,
            max,
        }
    }

    /// Returns the delay before re-enqueueing after `attempt_count` failed
    /// attempts. `attempt_count` counts from 1 (the first attempt just
    /// failed).
    pub fn delay(&self, attempt_count: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Fixed => self.base,
            RetryStrategy::Exponential => {
                let exponent = attempt_count.saturating_sub(1).min(63);
                let factor = self.multiplier.powi(exponent as i32);
                let millis = self.base.as_millis() as f64 * factor;
                if millis >= self.max.as_millis() as f64 {
                    self.max
                } else {
                    Duration::from_millis(millis as u64)
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
