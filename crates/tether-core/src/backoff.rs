//! Reconnect backoff calculation.
//!
//! Pure, sync-only math. The async reconnect loop that sleeps on these
//! delays lives in `tether-ws`.
//!
//! Formula: `min(initial_delay * factor^attempt, max_delay)`
//!
//! No jitter is applied, so the delay is monotonically non-decreasing in the
//! attempt counter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default initial reconnect delay in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
/// Default maximum reconnect delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default multiplier applied per attempt.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Parameters of a capped exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Delay before the first retry, in ms.
    pub initial_delay_ms: u64,
    /// Upper bound for any delay, in ms.
    pub max_delay_ms: u64,
    /// Growth factor per attempt. Values below `1.0` are treated as `1.0`.
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before the zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay(
            attempt,
            self.initial_delay_ms,
            self.max_delay_ms,
            self.factor,
        ))
    }
}

/// Calculate the capped exponential delay in milliseconds for `attempt`.
///
/// # Arguments
///
/// * `attempt`: zero-based attempt index (0 for the first reconnect)
/// * `initial_delay_ms`: delay for attempt 0
/// * `max_delay_ms`: cap
/// * `factor`: multiplier per attempt (clamped to at least `1.0`; NaN → `1.0`)
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn calculate_backoff_delay(
    attempt: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    factor: f64,
) -> u64 {
    let factor = if factor.is_nan() { 1.0 } else { factor.max(1.0) };
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let raw = (initial_delay_ms as f64) * factor.powi(exponent);

    if !raw.is_finite() || raw >= max_delay_ms as f64 {
        return max_delay_ms;
    }
    (raw.round() as u64).min(max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn policy_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!((policy.factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn policy_serde_defaults() {
        let policy: BackoffPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, BackoffPolicy::default());
    }

    #[test]
    fn policy_serde_camel_case() {
        let policy: BackoffPolicy =
            serde_json::from_str(r#"{"initialDelayMs": 50, "maxDelayMs": 400, "factor": 3.0}"#)
                .unwrap();
        assert_eq!(policy.initial_delay_ms, 50);
        assert_eq!(policy.max_delay_ms, 400);
    }

    #[test]
    fn exponential_growth() {
        assert_eq!(calculate_backoff_delay(0, 1000, 60_000, 2.0), 1000);
        assert_eq!(calculate_backoff_delay(1, 1000, 60_000, 2.0), 2000);
        assert_eq!(calculate_backoff_delay(2, 1000, 60_000, 2.0), 4000);
        assert_eq!(calculate_backoff_delay(3, 1000, 60_000, 2.0), 8000);
    }

    #[test]
    fn fractional_factor() {
        assert_eq!(calculate_backoff_delay(1, 1000, 60_000, 1.5), 1500);
        assert_eq!(calculate_backoff_delay(2, 1000, 60_000, 1.5), 2250);
    }

    #[test]
    fn caps_at_max() {
        assert_eq!(calculate_backoff_delay(10, 1000, 30_000, 2.0), 30_000);
    }

    #[test]
    fn high_attempt_no_overflow() {
        assert_eq!(calculate_backoff_delay(u32::MAX, 1000, 30_000, 2.0), 30_000);
    }

    #[test]
    fn factor_below_one_is_flat() {
        assert_eq!(calculate_backoff_delay(5, 1000, 30_000, 0.5), 1000);
        assert_eq!(calculate_backoff_delay(5, 1000, 30_000, f64::NAN), 1000);
    }

    #[test]
    fn delay_for_returns_duration() {
        let policy = BackoffPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 250,
            factor: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
    }

    proptest! {
        #[test]
        fn delay_is_monotonic_and_capped(
            initial in 1u64..10_000,
            max in 1u64..120_000,
            factor in 1.0f64..4.0,
            attempt in 0u32..64,
        ) {
            let a = calculate_backoff_delay(attempt, initial, max, factor);
            let b = calculate_backoff_delay(attempt + 1, initial, max, factor);
            prop_assert!(b >= a);
            prop_assert!(a <= max);
            prop_assert!(b <= max);
        }
    }
}
