//! Exponential backoff policy for retryable task failures.

use std::time::Duration;

use crate::config::RetryConfig;

/// Retry policy `(max_attempts, base_delay, multiplier, max_delay)` with
/// ±25% jitter on every delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Backoff before re-dispatching after failed attempt number `attempt`
    /// (1-based): `min(base_delay * multiplier^(attempt-1), max_delay)`,
    /// jittered by ±25%.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let raw = self.base_delay.mul_f64(self.multiplier.powi(exponent));
        let capped = raw.min(self.max_delay);
        let jitter = 0.75 + fastrand::f64() * 0.5;
        capped.mul_f64(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1_000), 2.0, Duration::from_millis(10_000))
    }

    fn within_jitter(delay: Duration, expected_ms: u64) -> bool {
        let ms = delay.as_millis() as u64;
        ms >= expected_ms * 3 / 4 && ms <= expected_ms * 5 / 4
    }

    #[test]
    fn first_attempt_uses_base_delay() {
        for _ in 0..50 {
            assert!(within_jitter(policy().backoff(1), 1_000));
        }
    }

    #[test]
    fn delay_grows_exponentially() {
        for _ in 0..50 {
            assert!(within_jitter(policy().backoff(2), 2_000));
            assert!(within_jitter(policy().backoff(3), 4_000));
        }
    }

    #[test]
    fn delay_capped_before_jitter() {
        for _ in 0..50 {
            // 1000 * 2^9 would be ~512s; the cap pins it at 10s ± jitter.
            assert!(within_jitter(policy().backoff(10), 10_000));
        }
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let delay = policy().backoff(u32::MAX);
        assert!(delay <= Duration::from_millis(12_500));
    }
}
