//! Throttling (429) retries honoring the server's retry-after hint

use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::config::ClientRetryConfig;
use crate::error::{ErrorKind, StoreError};
use crate::observability::{log_event_with_fields, Event};
use crate::store::{header_names, ServiceRequest};

use super::{RetryPolicy, ShouldRetry};

/// Delay used when a 429 carries no retry-after hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

pub struct ThrottleRetryPolicy {
    attempt_count: u32,
    max_attempt_count: u32,
    cumulative_delay: Duration,
    max_wait_time: Duration,
}

impl ThrottleRetryPolicy {
    pub fn new(config: &ClientRetryConfig) -> Self {
        Self {
            attempt_count: 0,
            max_attempt_count: config.max_throttle_retries,
            cumulative_delay: Duration::ZERO,
            max_wait_time: Duration::from_secs(config.max_throttle_wait_secs),
        }
    }

    pub fn decide(&mut self, error: StoreError) -> ShouldRetry {
        if error.kind != ErrorKind::TooManyRequests {
            return ShouldRetry::No(error);
        }
        if self.attempt_count >= self.max_attempt_count {
            return ShouldRetry::No(error);
        }

        let hinted = error
            .headers
            .get_i64(header_names::RETRY_AFTER_MS)
            .filter(|ms| *ms >= 0)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(Duration::ZERO);

        if self.cumulative_delay > self.max_wait_time || hinted > self.max_wait_time {
            return ShouldRetry::No(error);
        }

        let delay = if hinted.is_zero() {
            DEFAULT_RETRY_AFTER
        } else {
            hinted
        };
        self.cumulative_delay += delay;
        self.attempt_count += 1;

        log_event_with_fields(
            Event::ThrottleRetry,
            &[
                ("attempt", self.attempt_count.to_string().as_str()),
                ("delay_ms", delay.as_millis().to_string().as_str()),
            ],
        );
        ShouldRetry::retry_after(delay)
    }
}

impl RetryPolicy for ThrottleRetryPolicy {
    fn should_retry<'a>(
        &'a mut self,
        error: StoreError,
        _request: &'a mut ServiceRequest,
    ) -> BoxFuture<'a, ShouldRetry> {
        let decision = self.decide(error);
        Box::pin(async move { decision })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{status, sub_status};
    use crate::store::Headers;

    fn throttled(retry_after_ms: Option<u64>) -> StoreError {
        let mut headers = Headers::new();
        if let Some(ms) = retry_after_ms {
            headers.set(header_names::RETRY_AFTER_MS, ms.to_string());
        }
        StoreError::from_status(status::TOO_MANY_REQUESTS, sub_status::UNKNOWN, "slow down")
            .with_headers(headers)
    }

    #[test]
    fn test_honors_retry_after() {
        let mut policy = ThrottleRetryPolicy::new(&ClientRetryConfig::default());
        match policy.decide(throttled(Some(250))) {
            ShouldRetry::After { backoff, .. } => assert_eq!(backoff, Duration::from_millis(250)),
            ShouldRetry::No(err) => panic!("unexpected: {}", err),
        }
    }

    #[test]
    fn test_attempt_limit() {
        let mut policy = ThrottleRetryPolicy::new(&ClientRetryConfig::default());
        for _ in 0..9 {
            assert!(policy.decide(throttled(Some(10))).is_retry());
        }
        assert!(!policy.decide(throttled(Some(10))).is_retry());
    }

    #[test]
    fn test_cumulative_wait_limit() {
        let mut policy = ThrottleRetryPolicy::new(&ClientRetryConfig::default());
        // Default delay is 5 s; the seventh retry would start past 30 s.
        for _ in 0..7 {
            assert!(policy.decide(throttled(None)).is_retry());
        }
        assert!(!policy.decide(throttled(None)).is_retry());
    }

    #[test]
    fn test_non_throttle_not_retried() {
        let mut policy = ThrottleRetryPolicy::new(&ClientRetryConfig::default());
        assert!(!policy.decide(StoreError::gone("x")).is_retry());
    }
}
