//! Exponential backoff policy shared by polling, stage retries and store writes.

use std::time::Duration;
use tributary_core::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            factor: 2,
            cap: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, factor: u32, cap: Duration) -> Self {
        Self { base, factor, cap }
    }

    /// Delay before the `n`th wait (1-based), capped
    pub fn delay(&self, n: u32) -> Duration {
        let multiplier = self
            .factor
            .max(1)
            .saturating_pow(n.saturating_sub(1));
        self.base.saturating_mul(multiplier).min(self.cap)
    }

    /// Delay before retry `n`, preferring the error's own retry-after hint
    pub fn delay_for(&self, err: &StageError, n: u32) -> Duration {
        match err.retry_after_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.delay(n),
        }
    }
}
