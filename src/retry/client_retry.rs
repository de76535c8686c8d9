//! Cross-region retries
//!
//! The outermost policy. Handles failures that another region can absorb:
//! a write region that lost its role (403/3), a region not yet serving
//! (403/1008), a session token no replica in this region has caught up to
//! (404/1002) and service unavailability (503). Anything else falls through
//! to throttling.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::config::ClientRetryConfig;
use crate::error::{ConsistencyResult, ErrorKind, StoreError};
use crate::observability::{log_event_with_fields, Event};
use crate::store::ServiceRequest;

use super::throttle::ThrottleRetryPolicy;
use super::{RetryPolicy, ShouldRetry};

/// Account topology and regional endpoint health.
pub trait EndpointManager: Send + Sync {
    /// Readable endpoints in preference order.
    fn read_endpoints(&self) -> Vec<String>;

    /// Writable endpoints in preference order.
    fn write_endpoints(&self) -> Vec<String>;

    /// Number of preferred locations configured for the client.
    fn preferred_location_count(&self) -> usize;

    fn can_use_multiple_write_locations(&self, request: &ServiceRequest) -> bool;

    /// Endpoint the request goes to under its current routing directive.
    fn resolve_service_endpoint(&self, request: &ServiceRequest) -> String;

    fn mark_endpoint_unavailable_for_read(&self, endpoint: &str);

    fn mark_endpoint_unavailable_for_write(&self, endpoint: &str);

    /// Re-read the account topology.
    fn refresh_location<'a>(&'a self, force_refresh: bool) -> BoxFuture<'a, ConsistencyResult<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryRoute {
    location_index: usize,
    use_preferred_locations: bool,
}

pub struct ClientRetryPolicy {
    endpoints: Arc<dyn EndpointManager>,
    throttle: ThrottleRetryPolicy,
    enable_endpoint_discovery: bool,
    max_failover_retries: u32,
    failover_retry_interval: Duration,
    max_service_unavailable_retries: u32,
    failover_retry_count: u32,
    session_token_retry_count: usize,
    service_unavailable_retry_count: u32,
    is_read_request: bool,
    can_use_multiple_write_locations: bool,
    location_endpoint: Option<String>,
    retry_route: Option<RetryRoute>,
}

impl ClientRetryPolicy {
    pub fn new(endpoints: Arc<dyn EndpointManager>, config: &ClientRetryConfig) -> Self {
        Self {
            endpoints,
            throttle: ThrottleRetryPolicy::new(config),
            enable_endpoint_discovery: config.enable_endpoint_discovery,
            max_failover_retries: config.max_failover_retries,
            failover_retry_interval: Duration::from_millis(config.failover_retry_interval_ms),
            max_service_unavailable_retries: config.max_service_unavailable_retries,
            failover_retry_count: 0,
            session_token_retry_count: 0,
            service_unavailable_retry_count: 0,
            is_read_request: true,
            can_use_multiple_write_locations: false,
            location_endpoint: None,
            retry_route: None,
        }
    }

    async fn decide(&mut self, error: StoreError) -> ShouldRetry {
        self.retry_route = None;

        match error.kind {
            ErrorKind::WriteForbidden => {
                return self.retry_on_endpoint_failure(error, false, true).await;
            }
            ErrorKind::CompletingPartitionMigration
                if self.is_read_request || self.can_use_multiple_write_locations =>
            {
                let is_read = self.is_read_request;
                return self.retry_on_endpoint_failure(error, is_read, false).await;
            }
            ErrorKind::SessionNotAvailable => return self.retry_on_session_not_available(error),
            ErrorKind::ServiceUnavailable => return self.retry_on_service_unavailable(error),
            _ => {}
        }

        self.throttle.decide(error)
    }

    async fn retry_on_endpoint_failure(
        &mut self,
        error: StoreError,
        is_read_request: bool,
        force_refresh: bool,
    ) -> ShouldRetry {
        if !self.enable_endpoint_discovery || self.failover_retry_count > self.max_failover_retries
        {
            return ShouldRetry::No(error);
        }
        self.failover_retry_count += 1;

        if let Some(endpoint) = self.location_endpoint.as_deref() {
            if is_read_request {
                self.endpoints.mark_endpoint_unavailable_for_read(endpoint);
            } else {
                self.endpoints.mark_endpoint_unavailable_for_write(endpoint);
            }
            log_event_with_fields(
                Event::EndpointMarkedUnavailable,
                &[
                    ("endpoint", endpoint),
                    ("operation", if is_read_request { "read" } else { "write" }),
                    ("status", error.status.to_string().as_str()),
                ],
            );
        }

        // The first write failover goes straight to the next region.
        let backoff = if is_read_request || self.failover_retry_count > 1 {
            self.failover_retry_interval
        } else {
            Duration::ZERO
        };

        if let Err(err) = self.endpoints.refresh_location(force_refresh).await {
            tracing::warn!(error = %err, "account topology refresh failed");
        }

        self.retry_route = Some(RetryRoute {
            location_index: self.failover_retry_count as usize,
            use_preferred_locations: false,
        });
        ShouldRetry::retry_after(backoff)
    }

    fn retry_on_session_not_available(&mut self, error: StoreError) -> ShouldRetry {
        self.session_token_retry_count += 1;
        if !self.enable_endpoint_discovery {
            return ShouldRetry::No(error);
        }

        if self.can_use_multiple_write_locations {
            let endpoint_count = if self.is_read_request {
                self.endpoints.read_endpoints().len()
            } else {
                self.endpoints.write_endpoints().len()
            };
            if self.session_token_retry_count > endpoint_count {
                return ShouldRetry::No(error);
            }
            self.retry_route = Some(RetryRoute {
                location_index: self.session_token_retry_count,
                use_preferred_locations: true,
            });
        } else {
            // Single write region: one retry against it.
            if self.session_token_retry_count > 1 {
                return ShouldRetry::No(error);
            }
            self.retry_route = Some(RetryRoute {
                location_index: 0,
                use_preferred_locations: false,
            });
        }
        ShouldRetry::retry_after(Duration::ZERO)
    }

    fn retry_on_service_unavailable(&mut self, error: StoreError) -> ShouldRetry {
        if self.service_unavailable_retry_count >= self.max_service_unavailable_retries {
            return ShouldRetry::No(error);
        }
        self.service_unavailable_retry_count += 1;

        if !self.can_use_multiple_write_locations && !self.is_read_request {
            return ShouldRetry::No(error);
        }
        if self.endpoints.preferred_location_count() <= 1 {
            return ShouldRetry::No(error);
        }

        self.retry_route = Some(RetryRoute {
            location_index: self.service_unavailable_retry_count as usize,
            use_preferred_locations: true,
        });
        ShouldRetry::retry_after(Duration::ZERO)
    }
}

impl RetryPolicy for ClientRetryPolicy {
    fn on_before_send_request(&mut self, request: &mut ServiceRequest) {
        self.is_read_request = request.is_read_only();
        self.can_use_multiple_write_locations =
            self.endpoints.can_use_multiple_write_locations(request);

        request.context.clear_route_to_location();
        if let Some(route) = self.retry_route {
            request
                .context
                .route_to_location_index(route.location_index, route.use_preferred_locations);
        }

        let endpoint = self.endpoints.resolve_service_endpoint(request);
        request.context.route_to_location_endpoint(endpoint.clone());
        self.location_endpoint = Some(endpoint);
    }

    fn should_retry<'a>(
        &'a mut self,
        error: StoreError,
        _request: &'a mut ServiceRequest,
    ) -> BoxFuture<'a, ShouldRetry> {
        Box::pin(self.decide(error))
    }
}
