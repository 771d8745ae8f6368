use std::time::Duration;

use crate::config::SessionConfig;

/// How failed dispatch attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub retry_limit: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub per_attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            backoff_base: config.retry_backoff_base,
            backoff_max: config.retry_backoff_max,
            per_attempt_timeout: config.per_attempt_timeout,
        }
    }

    /// Exponential backoff before the `retry`-th retry (starting at 1).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.backoff_max)
    }

    /// Whether another attempt is allowed after `attempts` attempts.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.retry_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(
            &SessionConfig::new()
                .with_retry_limit(3)
                .with_retry_backoff(Duration::from_millis(100), Duration::from_secs(1)),
        )
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_secs(1));
        assert_eq!(policy.backoff(64), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_limit() {
        let policy = policy();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
