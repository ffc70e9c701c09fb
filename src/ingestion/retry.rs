//! Exponential backoff with bounded jitter.
//!
//! Shared by the ingestion queue (persisted `next_attempt_at`) and the
//! capture path (in-process sleeps).

use std::time::Duration;

use rand::Rng;

use crate::config::{CaptureSettings, IngestionSettings};

/// Backoff schedule: `base * multiplier^(attempt-1)`, then +/- jitter, then
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&IngestionSettings::default())
    }
}

impl From<&IngestionSettings> for RetryPolicy {
    fn from(settings: &IngestionSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: settings.multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }
}

impl From<&CaptureSettings> for RetryPolicy {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay before retry number `attempt` (1-based), no jitter.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1).min(30)).unwrap_or(30);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Delay before retry number `attempt` with jitter applied.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt).as_millis() as f64;
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        let millis = (base * (1.0 + factor)).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Absolute Unix-millis time of the next attempt, from `now`.
    #[must_use]
    pub fn next_attempt_at(&self, attempt: u32, now: i64) -> i64 {
        let delay = i64::try_from(self.delay_for(attempt).as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(delay)
    }
}
