//! Scheduling of the next poll after an attempt.

use std::time::Duration;

/// Decides how long the poller waits before its next attempt.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt.
    ///
    /// `consecutive_failures` is zero after a successful attempt.
    fn next_delay(&self, interval: Duration, consecutive_failures: u64) -> Duration;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Always wait the configured interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedInterval;

impl RetryPolicy for FixedInterval {
    fn next_delay(&self, interval: Duration, _consecutive_failures: u64) -> Duration {
        interval
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Double the wait after every consecutive failure, up to `max`.
///
/// The first failure waits one interval, the second two, the third four.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(max: Duration) -> Self {
        Self { max }
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, interval: Duration, consecutive_failures: u64) -> Duration {
        if consecutive_failures == 0 {
            return interval;
        }
        // 2^31 intervals is already far beyond any sane cap
        let exponent = (consecutive_failures - 1).min(31) as u32;
        let delay = interval.saturating_mul(1u32 << exponent);
        delay.min(self.max.max(interval))
    }

    fn name(&self) -> &'static str {
        "exponential"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_fixed_interval_ignores_failures() {
        let policy = FixedInterval;
        assert_eq!(policy.next_delay(MINUTE, 0), MINUTE);
        assert_eq!(policy.next_delay(MINUTE, 1), MINUTE);
        assert_eq!(policy.next_delay(MINUTE, 1_000), MINUTE);
    }

    #[test]
    fn test_exponential_doubles_then_caps() {
        let policy = ExponentialBackoff::new(Duration::from_secs(300));

        assert_eq!(policy.next_delay(MINUTE, 0), MINUTE);
        assert_eq!(policy.next_delay(MINUTE, 1), MINUTE);
        assert_eq!(policy.next_delay(MINUTE, 2), Duration::from_secs(120));
        assert_eq!(policy.next_delay(MINUTE, 3), Duration::from_secs(240));
        assert_eq!(policy.next_delay(MINUTE, 4), Duration::from_secs(300));
        assert_eq!(policy.next_delay(MINUTE, u64::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_exponential_cap_below_interval_keeps_interval() {
        let policy = ExponentialBackoff::new(Duration::from_secs(10));
        assert_eq!(policy.next_delay(MINUTE, 5), MINUTE);
    }
}
