use std::time::Duration;

use super::QueryError;

/// Configuration for query behavior.
///
/// This controls how queries cache data, when they consider it stale, and how
/// failed fetches are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// How long data is considered fresh before becoming stale.
    ///
    /// When data is fresh, queries will use cached data without refetching.
    /// Once stale, queries will refetch while still showing cached data.
    pub stale_time: Duration,

    /// How long cached data is retained before being garbage collected.
    pub cache_time: Duration,

    /// Retry behavior for failed fetches.
    pub retry: RetryPolicy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(0),      // immediately stale
            cache_time: Duration::from_secs(5 * 60), // 5 minutes
            retry: RetryPolicy::DEFAULT,
        }
    }
}

impl QueryConfig {
    /// Creates a new query configuration with the given stale and cache times.
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
            retry: RetryPolicy::DEFAULT,
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Decides whether a failed fetch is attempted again.
///
/// Authorization failures and missing resources are never retried. Anything
/// else is retried up to `max_retries` times with exponential back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles for every further retry.
    pub retry_delay: Duration,
    /// Upper bound for the back-off delay.
    pub max_retry_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT: Self = Self::new(2, Duration::from_secs(1));

    /// Never retry.
    pub const NEVER: Self = Self::new(0, Duration::ZERO);

    #[must_use]
    pub const fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            max_retry_delay: Duration::from_secs(30),
        }
    }

    /// Returns `true` if a fetch that failed `failure_count` times should run again.
    pub fn should_retry(&self, failure_count: u32, error: &QueryError) -> bool {
        if matches!(error.status(), Some(401 | 404)) {
            return false;
        }
        failure_count <= self.max_retries
    }

    /// Back-off before the retry that follows the `failure_count`-th failure.
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        let exponent = failure_count.saturating_sub(1).min(16);
        self.retry_delay
            .saturating_mul(1 << exponent)
            .min(self.max_retry_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = QueryConfig::default();
        assert_eq!(config.stale_time, Duration::from_secs(0));
        assert_eq!(config.cache_time, Duration::from_secs(5 * 60));
        assert_eq!(config.retry, RetryPolicy::DEFAULT);
    }

    #[test]
    fn test_new_config() {
        let config = QueryConfig::new(Duration::from_secs(30), Duration::from_secs(300));
        assert_eq!(config.stale_time, Duration::from_secs(30));
        assert_eq!(config.cache_time, Duration::from_secs(300));
    }

    #[test]
    fn test_retry_skips_not_found_and_unauthorized() {
        let policy = RetryPolicy::DEFAULT;
        let not_found = QueryError::from(ApiError::Response {
            status: 404,
            body: json!({"message": "not found"}),
        });
        assert!(!policy.should_retry(1, &not_found));
        assert!(!policy.should_retry(1, &QueryError::from(ApiError::Unauthorized)));
    }

    #[test]
    fn test_retry_limit() {
        let policy = RetryPolicy::DEFAULT;
        let error = QueryError::FetchError("flaky".to_string());
        assert!(policy.should_retry(1, &error));
        assert!(policy.should_retry(2, &error));
        assert!(!policy.should_retry(3, &error));
        assert!(!RetryPolicy::NEVER.should_retry(1, &error));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::DEFAULT;
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }
}
