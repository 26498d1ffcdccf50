//! Retry policy with exponential backoff.

use rand::Rng;
use std::time::Duration;

use crate::config::SchedulerConfig;

/// Retry policy for failed jobs
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per job, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to add ±10% jitter to delays
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            jitter_enabled: config.jitter,
        }
    }

    /// Disable jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    /// Whether a job that has made `attempt` attempts may run again
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base_millis = self.base_delay.as_millis() as f64 * 2f64.powi(exponent);
        let max_millis = self.max_delay.as_millis() as f64;
        let capped = base_millis.min(max_millis);

        let millis = if self.jitter_enabled {
            let jitter_factor = rand::thread_rng().gen_range(0.9..=1.1);
            (capped * jitter_factor).min(max_millis)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
            jitter_enabled: false,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let p = policy();
        assert_eq!(p.next_delay(1), Duration::from_millis(250));
        assert_eq!(p.next_delay(2), Duration::from_millis(500));
        assert_eq!(p.next_delay(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy();
        assert_eq!(p.next_delay(10), Duration::from_secs(1));
        assert_eq!(p.next_delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut p = policy();
        p.jitter_enabled = true;
        for _ in 0..50 {
            let d = p.next_delay(1).as_millis();
            assert!((224..=275).contains(&d), "delay {d}");
        }
    }

    #[test]
    fn test_should_retry() {
        let p = policy();
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn test_from_config() {
        let p = RetryPolicy::from_config(&SchedulerConfig::default());
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_delay, Duration::from_millis(250));
        assert!(!p.without_jitter().jitter_enabled);
    }
}
