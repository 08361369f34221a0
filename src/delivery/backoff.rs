//! Exponential backoff after rate limits.
//!
//! The sink tells us how long to wait (`retry_after`). Consecutive rate limits
//! on the same destination grow that delay exponentially:
//!
//! - 1st: `retry_after`
//! - 2nd: `retry_after * 2`
//! - nth: `retry_after * 2^(n-1)`, capped at `max_delay` (60s by default)
//!
//! The counter resets on the first successful send.

use std::time::Duration;

/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Cap for exponential growth.
    pub max_delay: Duration,

    /// Growth factor per consecutive rate limit (typically 2.0).
    pub multiplier: f64,
}

impl BackoffConfig {
    pub const DEFAULT: Self = Self {
        max_delay: DEFAULT_MAX_BACKOFF,
        multiplier: 2.0,
    };

    pub fn with_max_delay(max_delay: Duration) -> Self {
        Self {
            max_delay,
            ..Self::DEFAULT
        }
    }

    /// Delay before the next drain after the `attempt`th consecutive rate limit
    /// (1-indexed). Attempt 0 is treated as 1.
    pub fn delay_for(&self, retry_after: Duration, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = retry_after.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
