//! Retry Policy Tests
//!
//! The retry layers driven through a full client:
//! - Gone replicas back off inside the gone budget, then give up
//! - Session races on writes are retried on the same region
//! - Write-forbidden regions fail over
//! - Throttled writes honor the retry-after hint

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;

use common::*;
use replicore::config::ConsistencyLevel;
use replicore::error::{status, sub_status, ConsistencyResult, ErrorKind, TransportError};
use replicore::retry::EndpointManager;
use replicore::store::{header_names, Headers, NoRotation, OperationType, ServiceRequest};
use replicore::{StoreClient, StoreClientParts};

fn server_error(status: u16, sub_status: u32, headers: Headers) -> Reply {
    Err(TransportError::Server {
        status,
        sub_status,
        message: "scripted failure".to_string(),
        headers,
    })
}

/// Single write region that records failover bookkeeping.
#[derive(Default)]
struct RecordingEndpoints {
    unavailable_for_write: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
}

impl EndpointManager for RecordingEndpoints {
    fn read_endpoints(&self) -> Vec<String> {
        vec!["https://west".to_string()]
    }

    fn write_endpoints(&self) -> Vec<String> {
        vec!["https://west".to_string()]
    }

    fn preferred_location_count(&self) -> usize {
        1
    }

    fn can_use_multiple_write_locations(&self, _request: &ServiceRequest) -> bool {
        false
    }

    fn resolve_service_endpoint(&self, _request: &ServiceRequest) -> String {
        "https://west".to_string()
    }

    fn mark_endpoint_unavailable_for_read(&self, _endpoint: &str) {}

    fn mark_endpoint_unavailable_for_write(&self, endpoint: &str) {
        self.unavailable_for_write
            .lock()
            .unwrap()
            .push(endpoint.to_string());
    }

    fn refresh_location<'a>(
        &'a self,
        _force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<()>> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

// =============================================================================
// Gone Budget
// =============================================================================

/// Gone on every attempt: backoff 1, 2, 4, 8 and then the 15 s left of a
/// 30 s budget, forced address refreshes on retries, and finally
/// ServiceUnavailable wrapping the gone error.
#[tokio::test(start_paused = true)]
async fn test_gone_write_exhausts_budget() {
    let transport = ScriptedTransport::new();
    transport.script(PRIMARY, vec![gone()]);
    let resolver = StaticResolver::new(replica_set());
    let client = client(config(ConsistencyLevel::Session), transport.clone(), resolver.clone());

    let started = Instant::now();
    let err = client.write(&mut create_request()).await.unwrap_err();

    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    assert_eq!(err.sub_status, sub_status::GONE_AFTER_RETRIES);
    let cause = err.cause.as_deref().expect("gone cause");
    assert_eq!(cause.kind, ErrorKind::Gone);

    assert_eq!(transport.calls_of(OperationType::Create), 6);
    assert!(resolver.forced_refreshes() >= 5);
    assert_eq!(client.metrics().retries, 5);
}

/// A replica that comes back within the budget serves the retried write.
#[tokio::test(start_paused = true)]
async fn test_gone_write_recovers_after_backoff() {
    let transport = ScriptedTransport::new();
    transport.script(PRIMARY, vec![gone(), Ok(ok(12))]);
    let resolver = StaticResolver::new(replica_set());
    let client = client(config(ConsistencyLevel::Session), transport.clone(), resolver.clone());

    let started = Instant::now();
    let response = client.write(&mut create_request()).await.unwrap();

    assert_eq!(response.lsn(), 12);
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert!(resolver.forced_refreshes() >= 1);
}

// =============================================================================
// Session Races
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_write_session_race_retried_in_region() {
    let transport = ScriptedTransport::new();
    transport.script(
        PRIMARY,
        vec![
            server_error(
                status::NOT_FOUND,
                sub_status::READ_SESSION_NOT_AVAILABLE,
                Headers::new(),
            ),
            Ok(ok(4)),
        ],
    );
    let client = client(
        config(ConsistencyLevel::Session),
        transport.clone(),
        StaticResolver::new(replica_set()),
    );

    let started = Instant::now();
    let response = client.write(&mut create_request()).await.unwrap();

    assert_eq!(response.lsn(), 4);
    assert_eq!(transport.calls_of(OperationType::Create), 2);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

/// Session reads that never catch up get one more try against the write
/// region, then surface the session error.
#[tokio::test]
async fn test_session_read_not_available_surfaces() {
    let transport = ScriptedTransport::new();
    let lagging = ok(8).headers.with(header_names::SESSION_TOKEN, "0:1#8");
    for uri in [PRIMARY, SECONDARY_1, SECONDARY_2, SECONDARY_3] {
        transport.always(uri, replicore::store::StoreResponse::new(200, lagging.clone()));
    }
    let client = client(
        config(ConsistencyLevel::Session),
        transport.clone(),
        StaticResolver::new(replica_set()),
    );

    let mut request = read_request().with_session_token("0:1#10");
    let err = client.read(&mut request).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::SessionNotAvailable);
    assert_eq!(transport.calls_of(OperationType::Read), 8);
}

// =============================================================================
// Regional Failover
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_write_forbidden_fails_over_immediately() {
    let transport = ScriptedTransport::new();
    transport.script(
        PRIMARY,
        vec![
            server_error(status::FORBIDDEN, sub_status::WRITE_FORBIDDEN, Headers::new()),
            Ok(ok(6)),
        ],
    );
    let endpoints = Arc::new(RecordingEndpoints::default());
    let parts = StoreClientParts::new(
        transport.clone(),
        StaticResolver::new(replica_set()),
        endpoints.clone(),
    )
    .with_random(Arc::new(NoRotation));
    let client = StoreClient::new(config(ConsistencyLevel::Session), parts).unwrap();

    let started = Instant::now();
    let response = client.write(&mut create_request()).await.unwrap();

    assert_eq!(response.lsn(), 6);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(
        *endpoints.unavailable_for_write.lock().unwrap(),
        vec!["https://west".to_string()]
    );
    assert_eq!(endpoints.refreshes.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Throttling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_throttled_write_waits_retry_after() {
    let transport = ScriptedTransport::new();
    transport.script(
        PRIMARY,
        vec![
            server_error(
                status::TOO_MANY_REQUESTS,
                sub_status::UNKNOWN,
                Headers::new().with(header_names::RETRY_AFTER_MS, 250),
            ),
            Ok(ok(2)),
        ],
    );
    let client = client(
        config(ConsistencyLevel::Session),
        transport.clone(),
        StaticResolver::new(replica_set()),
    );

    let started = Instant::now();
    client.write(&mut create_request()).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_millis(250));
    assert_eq!(transport.calls_of(OperationType::Create), 2);
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let transport = ScriptedTransport::new();
    transport.script(
        PRIMARY,
        vec![server_error(status::BAD_REQUEST, sub_status::UNKNOWN, Headers::new())],
    );
    let client = client(
        config(ConsistencyLevel::Session),
        transport.clone(),
        StaticResolver::new(replica_set()),
    );

    let err = client.write(&mut create_request()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::BadRequest);
    assert_eq!(transport.calls_of(OperationType::Create), 1);
}
