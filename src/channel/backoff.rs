//! Exponential-backoff policy for channel reconnection.
//!
//! The delay computation is a pure function, kept separate from the
//! timer-scheduling side effects in the client so it can be tested
//! exhaustively on its own.

use std::time::Duration;

/// Tunable parameters for the reconnection strategy.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Whether the channel reconnects automatically after a non-clean close.
    pub auto_reconnect: bool,
    /// Retry cap. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnection attempt.
    pub base: Duration,
    /// Upper bound on the delay between attempts.
    pub max: Duration,
    /// Factor by which the delay grows with each recorded attempt.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: Some(10),
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
            multiplier: 1.5,
        }
    }
}

/// Computes the retry delay for the given attempt number.
///
/// `attempts` is the number of retries that have already fired (so the
/// first retry after a drop uses attempt `0`). The result is
/// `base * multiplier^attempts`, floored to whole milliseconds and
/// clamped to [`BackoffPolicy::max`].
#[must_use]
pub fn delay_for_attempt(attempts: u32, policy: &BackoffPolicy) -> Duration {
    let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
    let raw_ms = policy.base.as_millis() as f64 * policy.multiplier.powi(exponent);
    let capped_ms = raw_ms.min(policy.max.as_millis() as f64);
    Duration::from_millis(capped_ms as u64)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_base_interval() {
        let policy = BackoffPolicy::default();
        assert_eq!(delay_for_attempt(0, &policy), Duration::from_millis(1_000));
    }

    #[test]
    fn delay_is_floored_to_whole_milliseconds() {
        let policy = BackoffPolicy::default();
        // 1000 * 1.5^5 = 7593.75
        assert_eq!(delay_for_attempt(5, &policy), Duration::from_millis(7_593));
    }

    #[test]
    fn delay_clamps_at_max() {
        let policy = BackoffPolicy::default();
        // 1000 * 1.5^20 is far beyond the 30s cap.
        assert_eq!(delay_for_attempt(20, &policy), Duration::from_millis(30_000));
    }

    #[test]
    fn delay_is_monotonically_non_decreasing() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..32 {
            let delay = delay_for_attempt(attempt, &policy);
            assert!(delay >= previous, "attempt {attempt} decreased the delay");
            assert!(delay <= policy.max);
            previous = delay;
        }
    }

    #[test]
    fn full_backoff_sequence() {
        let policy = BackoffPolicy::default();
        let expected_ms = [1_000, 1_500, 2_250, 3_375, 5_062, 7_593, 11_390, 17_085, 25_628, 30_000];

        for (attempt, expected) in expected_ms.iter().enumerate() {
            let delay = delay_for_attempt(attempt as u32, &policy);
            assert_eq!(delay, Duration::from_millis(*expected), "attempt {attempt}");
        }
    }

    #[test]
    fn custom_multiplier() {
        let policy = BackoffPolicy {
            multiplier: 3.0,
            max: Duration::from_secs(60),
            ..BackoffPolicy::default()
        };
        assert_eq!(delay_for_attempt(2, &policy), Duration::from_secs(9));
    }
}
