//! Bounded exponential retry after validation failures.
//!
//! Attempt `k` (zero-based) waits `base << k`. Once `max_retries`
//! attempts have been scheduled the next failure resets the count and
//! gives up until an organic trigger starts a fresh evaluation.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-evaluate after `delay_ms`. `attempt` counts from 1.
    Retry { attempt: u32, delay_ms: u64 },
    /// Retries exhausted; the count has been reset.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryController {
    consecutive_failures: u32,
}

impl RetryController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn on_validation_failed(&mut self, max_retries: u32, base_delay_ms: u64) -> RetryDecision {
        if self.consecutive_failures >= max_retries {
            self.consecutive_failures = 0;
            return RetryDecision::Exhausted;
        }
        let delay_ms = backoff_delay_ms(base_delay_ms, self.consecutive_failures);
        self.consecutive_failures += 1;
        RetryDecision::Retry {
            attempt: self.consecutive_failures,
            delay_ms,
        }
    }

    /// Returns whether there was anything to reset.
    pub fn reset(&mut self) -> bool {
        std::mem::take(&mut self.consecutive_failures) != 0
    }
}

/// `base << shift`, saturating instead of overflowing.
pub fn backoff_delay_ms(base_delay_ms: u64, shift: u32) -> u64 {
    let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor)
}
