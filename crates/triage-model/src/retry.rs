//! Exponential backoff policy shared by store reconnection and action retries

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff without jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_ms: u64,
    /// Upper bound for any delay
    pub max_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 100,
            max_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Policy with explicit bounds
    #[must_use]
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_ms: u64::try_from(initial.as_millis()).unwrap_or(u64::MAX),
            max_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            multiplier,
        }
    }

    /// Delay before retry number `retry` (1-based)
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.initial_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(4), Duration::from_millis(800));
        assert_eq!(p.delay(30), Duration::from_millis(5_000));
    }
}
