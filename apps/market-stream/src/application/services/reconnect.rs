//! Reconnection Policy
//!
//! Exponential backoff for supervised reconnection. The delay before
//! attempt `n` is `min(base_delay * multiplier^(n-1), max_delay)`, with an
//! optional symmetric jitter.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor per attempt (2.0 doubles the delay).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%). 0 disables it.
    pub jitter_factor: f64,
    /// Attempts before giving up. 0 disables automatic reconnection.
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_retries: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt` (1-based), before jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_millis = self.max_delay.as_millis();

        let millis = if scaled.is_finite() && scaled >= 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (scaled.round() as u128).min(max_millis)
            }
        } else {
            max_millis
        };
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Reconnection policy implementing exponential backoff with jitter.
///
/// # Example
///
/// ```rust
/// use market_stream::application::services::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     max_retries: 2,
///     ..ReconnectConfig::default()
/// });
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), None);
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Start the next attempt and return how long to wait before it.
    ///
    /// Returns `None` once `max_retries` attempts have been made.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        Some(self.apply_jitter(self.config.delay_for(self.attempt_count)))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts started so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_retries
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn no_jitter(max_retries: u32) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_retries,
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn policy_exponential_backoff() {
        let mut policy = ReconnectPolicy::new(no_jitter(10));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(800)));
    }

    #[test]
    fn policy_max_delay_cap() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            multiplier: 4.0,
            ..no_jitter(10)
        };
        let mut policy = ReconnectPolicy::new(config);

        let _ = policy.next_delay();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn policy_max_retries() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 1);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        // No fourth attempt
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn zero_retries_never_reconnects() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        assert!(!policy.should_retry());
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let config = no_jitter(u32::MAX);
        assert_eq!(config.delay_for(u32::MAX), config.max_delay);
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_max(
            base_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            attempt in 1u32..64,
        ) {
            let config = ReconnectConfig {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                ..no_jitter(64)
            };
            prop_assert!(config.delay_for(attempt) <= config.max_delay);
        }

        #[test]
        fn delay_is_monotonic(base_ms in 1u64..5_000, attempt in 1u32..40) {
            let config = ReconnectConfig {
                base_delay: Duration::from_millis(base_ms),
                ..no_jitter(64)
            };
            prop_assert!(config.delay_for(attempt) <= config.delay_for(attempt + 1));
        }

        #[test]
        fn jitter_stays_within_factor(base_ms in 100u64..10_000) {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(60),
                jitter_factor: 0.1,
                ..no_jitter(1)
            });
            let millis = policy.next_delay().unwrap().as_millis();
            let base = u128::from(base_ms);
            prop_assert!(millis * 10 >= base * 9 - 10);
            prop_assert!(millis * 10 <= base * 11 + 10);
        }
    }
}
