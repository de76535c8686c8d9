//! Retry Policies
//!
//! A retry policy wraps one logical request. After each failed attempt it
//! decides whether to resubmit, after which backoff, and with which routing
//! hints flipped on the request.
//!
//! Layering, outermost first:
//!
//! ```text
//! ClientRetryPolicy             endpoint failover, session region reroute, 503, 429
//!   GoneAndRetryWithRetryPolicy gone, retry-with, migration, split, stale name cache
//!     SessionTokenMismatchRetryPolicy (writes only) 404/1002 race after a write
//! ```

mod client_retry;
mod gone_and_retry_with;
mod session_token_mismatch;
mod throttle;

use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::{ConsistencyResult, StoreError};
use crate::store::ServiceRequest;

pub use client_retry::{ClientRetryPolicy, EndpointManager};
pub use gone_and_retry_with::GoneAndRetryWithRetryPolicy;
pub use session_token_mismatch::SessionTokenMismatchRetryPolicy;
pub use throttle::ThrottleRetryPolicy;

/// Per-attempt directives handed to the operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attempt {
    /// Not the first attempt of the logical request
    pub is_in_retry: bool,
    /// Bypass the address cache on this attempt
    pub force_refresh: bool,
}

impl Attempt {
    pub fn first() -> Self {
        Self::default()
    }

    pub fn retry(force_refresh: bool) -> Self {
        Self {
            is_in_retry: true,
            force_refresh,
        }
    }
}

/// Retry decision.
#[derive(Debug)]
pub enum ShouldRetry {
    /// Give up and surface this error
    No(StoreError),
    /// Resubmit after `backoff`
    After {
        backoff: Duration,
        force_refresh: bool,
    },
}

impl ShouldRetry {
    pub fn retry_after(backoff: Duration) -> Self {
        Self::After {
            backoff,
            force_refresh: false,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Self::After { .. })
    }
}

/// Decides whether a failed attempt is resubmitted.
pub trait RetryPolicy: Send {
    /// Called before every attempt, including the first.
    fn on_before_send_request(&mut self, _request: &mut ServiceRequest) {}

    fn should_retry<'a>(
        &'a mut self,
        error: StoreError,
        request: &'a mut ServiceRequest,
    ) -> BoxFuture<'a, ShouldRetry>;
}

/// One attempt of a logical request.
pub trait RetriableOperation: Sync {
    type Output: Send;

    fn invoke<'a>(
        &'a self,
        request: &'a mut ServiceRequest,
        attempt: Attempt,
    ) -> BoxFuture<'a, ConsistencyResult<Self::Output>>;
}

/// Run `operation` until it succeeds or `policy` gives up.
pub async fn execute<P, O>(
    policy: &mut P,
    request: &mut ServiceRequest,
    operation: &O,
    first: Attempt,
) -> ConsistencyResult<O::Output>
where
    P: RetryPolicy + ?Sized,
    O: RetriableOperation + ?Sized,
{
    let mut attempt = first;
    loop {
        policy.on_before_send_request(request);

        let error = match operation.invoke(request, attempt).await {
            Ok(output) => return Ok(output),
            Err(error) => error,
        };

        match policy.should_retry(error, request).await {
            ShouldRetry::No(error) => return Err(error),
            ShouldRetry::After {
                backoff,
                force_refresh,
            } => {
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                attempt = Attempt::retry(force_refresh);
            }
        }
    }
}
