//! Retry backoff for transient failures.

use std::time::Duration;

use rand::Rng;

use crate::config::QueueSettings;

/// Jitter applied to every retry delay, as a fraction of the delay.
const JITTER_FRACTION: f64 = 0.25;

/// Exponential backoff: `min(base * 2^retry_count, cap)`, jittered by ±25%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub(crate) fn from_settings(settings: &QueueSettings) -> Self {
        Self::new(settings.retry_base_delay(), settings.retry_max_delay())
    }

    /// Un-jittered delay before retry number `retry_count + 1`.
    pub(crate) fn base_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay actually waited: the base delay scaled by a random factor in
    /// `[0.75, 1.25]`.
    pub(crate) fn delay(&self, retry_count: u32) -> Duration {
        let factor = rand::rng().random_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
        self.base_delay(retry_count).mul_f64(factor)
    }
}
