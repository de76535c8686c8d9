//! Session token mismatch retries
//!
//! Covers the race where a write lands before the replica serving it has
//! caught up to the caller's session: 404/1002 is retried with a short
//! capped backoff inside a small wall-clock budget.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::config::SessionRetryConfig;
use crate::error::{ErrorKind, StoreError};
use crate::observability::{log_event_with_fields, Event};
use crate::store::ServiceRequest;

use super::{RetryPolicy, ShouldRetry};

pub struct SessionTokenMismatchRetryPolicy {
    started_at: Option<Instant>,
    retry_count: u32,
    current_backoff: Duration,
    max_backoff: Duration,
    budget: Duration,
}

impl SessionTokenMismatchRetryPolicy {
    pub fn new(config: &SessionRetryConfig) -> Self {
        Self {
            started_at: None,
            retry_count: 0,
            current_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            budget: Duration::from_millis(config.budget_ms),
        }
    }

    fn decide(&mut self, error: StoreError) -> ShouldRetry {
        if error.kind != ErrorKind::SessionNotAvailable {
            return ShouldRetry::No(error);
        }

        self.retry_count += 1;
        let started_at = *self.started_at.get_or_insert_with(Instant::now);
        let elapsed = started_at.elapsed();
        if elapsed > self.budget {
            return ShouldRetry::No(error);
        }

        // First retry is immediate.
        let backoff = if self.retry_count > 1 {
            let remaining = self.budget - elapsed;
            let backoff = self.current_backoff.min(remaining);
            self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);
            backoff
        } else {
            Duration::ZERO
        };

        log_event_with_fields(
            Event::SessionTokenMismatchRetry,
            &[
                ("attempt", self.retry_count.to_string().as_str()),
                ("backoff_ms", backoff.as_millis().to_string().as_str()),
            ],
        );
        ShouldRetry::retry_after(backoff)
    }
}

impl RetryPolicy for SessionTokenMismatchRetryPolicy {
    fn should_retry<'a>(
        &'a mut self,
        error: StoreError,
        _request: &'a mut ServiceRequest,
    ) -> BoxFuture<'a, ShouldRetry> {
        let decision = self.decide(error);
        Box::pin(async move { decision })
    }
}
