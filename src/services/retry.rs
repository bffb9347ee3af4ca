//! Retry and backoff discipline.
//!
//! Deploy failures tagged `Transient` retry on an exponential schedule
//! (initial 2s, factor 2, cap 60s, max 3 attempts). Verify polls the
//! same schedule under a hard wall-clock cap before giving up.

use std::time::Duration;

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    pub initial: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            factor: 2,
            cap: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl BackoffSchedule {
    /// Delay before retry number `attempt` (1-based; attempt 0 is the
    /// initial try and has no delay).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.factor.saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial.saturating_mul(factor);
        delay.min(self.cap)
    }

    /// Whether another attempt is allowed after `attempts` tries.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_and_cap() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay(0), Duration::ZERO);
        assert_eq!(schedule.delay(1), Duration::from_secs(2));
        assert_eq!(schedule.delay(2), Duration::from_secs(4));
        assert_eq!(schedule.delay(3), Duration::from_secs(8));
        // far future attempts stay capped
        assert_eq!(schedule.delay(20), Duration::from_secs(60));
    }

    #[test]
    fn test_attempt_limit() {
        let schedule = BackoffSchedule::default();
        assert!(schedule.should_retry(1));
        assert!(schedule.should_retry(2));
        assert!(!schedule.should_retry(3));
    }
}
