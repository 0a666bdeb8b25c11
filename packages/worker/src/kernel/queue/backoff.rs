//! Retry backoff policy.

use chrono::Duration;
use rand::Rng;

use crate::kernel::error::ProcessError;

/// Backoff inputs from worker settings.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub retry_base_seconds: i64,
    pub retry_max_seconds: i64,
    /// Minimum delay after a bot wall / 429.
    pub blocked_floor_seconds: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retry_base_seconds: 30,
            retry_max_seconds: 3600,
            blocked_floor_seconds: 600,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempts + 1`:
    /// `min(retry_max, retry_base * 2^(attempts-1)) * uniform(0.5, 1.5)`,
    /// with `Blocked` errors raised to their own floor before jitter.
    pub fn delay(&self, attempts: i32, err: &ProcessError) -> Duration {
        let exponent = attempts.max(1) - 1;
        let mut seconds = self
            .retry_base_seconds
            .saturating_mul(1i64 << exponent.min(32))
            .min(self.retry_max_seconds);

        if matches!(err, ProcessError::Blocked(_)) {
            seconds = seconds.max(self.blocked_floor_seconds);
        }

        let jitter = rand::rng().random_range(0.5..1.5);
        Duration::milliseconds((seconds as f64 * 1000.0 * jitter) as i64)
    }
}
