//! Retry and pacing policy for the scheduling loop

use rand::Rng;
use std::time::Duration;
use volsched_core::SchedulerConfig;

use crate::capacity::LimitPolicy;

/// What to do with a volume after a failed resolution or launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue; do not try again before the delay has passed
    RetryAfter(Duration),
    /// Stop trying and report the volume as abandoned
    GiveUp,
}

/// Exponential backoff with an optional attempt cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on the delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Decide after `attempt` failed attempts (1-based)
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return RetryDecision::GiveUp;
            }
        }

        // base * 2^(attempt-1), capped
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}

/// Everything that shapes a run besides the volume list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Wait between passes
    pub poll_interval: Duration,
    /// Upper bound of the random extra wait per pass
    pub jitter: Duration,
    pub retry: RetryPolicy,
    pub limits: LimitPolicy,
    /// Query job statuses concurrently
    pub concurrent_poll: bool,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            jitter: Duration::ZERO,
            retry: RetryPolicy::default(),
            limits: LimitPolicy::default(),
            concurrent_poll: false,
        }
    }
}

impl SchedulePolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            jitter: Duration::from_millis(config.jitter_ms),
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
            limits: LimitPolicy::from_config(config),
            concurrent_poll: config.concurrent_poll,
        }
    }

    /// Wait before the next pass
    pub fn next_wait(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.poll_interval;
        }

        let mut rng = rand::thread_rng();
        self.poll_interval + Duration::from_millis(rng.gen_range(0..=jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retries_forever_without_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::ZERO));
        assert_eq!(policy.decide(1000), RetryDecision::RetryAfter(Duration::ZERO));
    }

    #[test]
    fn test_bounded_attempts() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        assert!(matches!(policy.decide(1), RetryDecision::RetryAfter(_)));
        assert!(matches!(policy.decide(2), RetryDecision::RetryAfter(_)));
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: None,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::from_secs(1)));
        assert_eq!(policy.decide(2), RetryDecision::RetryAfter(Duration::from_secs(2)));
        assert_eq!(policy.decide(3), RetryDecision::RetryAfter(Duration::from_secs(4)));
        assert_eq!(policy.decide(4), RetryDecision::RetryAfter(Duration::from_secs(5)));
        assert_eq!(policy.decide(60), RetryDecision::RetryAfter(Duration::from_secs(5)));
    }

    #[test]
    fn test_from_config() {
        let config = SchedulerConfig {
            poll_interval_secs: 2,
            jitter_ms: 500,
            max_attempts: Some(4),
            retry_base_delay_ms: 100,
            concurrent_poll: true,
            ..SchedulerConfig::default()
        };
        let policy = SchedulePolicy::from_config(&config);
        assert_eq!(policy.poll_interval, Duration::from_secs(2));
        assert_eq!(policy.jitter, Duration::from_millis(500));
        assert_eq!(policy.retry.max_attempts, Some(4));
        assert_eq!(policy.retry.base_delay, Duration::from_millis(100));
        assert_eq!(policy.retry.max_delay, Duration::from_secs(60));
        assert_eq!(policy.limits, LimitPolicy::default());
        assert!(policy.concurrent_poll);
    }

    #[test]
    fn test_next_wait_within_jitter() {
        let policy = SchedulePolicy {
            jitter: Duration::from_millis(250),
            ..SchedulePolicy::default()
        };
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let wait = policy.next_wait();
            assert!(wait >= Duration::from_secs(5));
            assert!(wait <= Duration::from_millis(5250));
            seen.insert(wait);
        }
        assert!(seen.len() > 1);
        assert_eq!(SchedulePolicy::default().next_wait(), Duration::from_secs(5));
    }
}
