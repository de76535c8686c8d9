//! Request deadline threaded through every layer

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{sub_status, ConsistencyResult, StoreError};

/// Single deadline for one logical request.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutHelper {
    started_at: Instant,
    timeout: Duration,
}

impl TimeoutHelper {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_elapsed(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Time left, zero once elapsed.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    /// Gone-class failure once the deadline passed (used while retrying).
    pub fn throw_gone_if_elapsed(&self) -> ConsistencyResult<()> {
        if self.is_elapsed() {
            return Err(StoreError::gone_with(
                sub_status::TRANSPORT_TIMEOUT,
                format!("request deadline of {:?} elapsed", self.timeout),
            ));
        }
        Ok(())
    }

    /// Timeout-class failure once the deadline passed (first attempt).
    pub fn throw_timeout_if_elapsed(&self) -> ConsistencyResult<()> {
        if self.is_elapsed() {
            return Err(StoreError::request_timeout(format!(
                "request deadline of {:?} elapsed",
                self.timeout
            )));
        }
        Ok(())
    }
}

impl Default for TimeoutHelper {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
