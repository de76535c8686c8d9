//! Multi-replica store reader
//!
//! Races reads against replicas and classifies the answers. Every selected
//! replica call of a batch runs concurrently and the batch is awaited as a
//! whole: vote counting needs every answer. Only the request deadline cuts a
//! batch short.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::Instant;

use crate::error::{status, sub_status, ConsistencyResult, StoreError};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::routing::AddressInformation;
use crate::session::{SessionToken, SessionTokenHelper};

use super::address_selector::AddressSelector;
use super::headers::header_names;
use super::random::RandomSource;
use super::request::ServiceRequest;
use super::store_result::StoreResult;
use super::transport::TransportClient;

/// Strategy a read runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Pinned replica or primary
    Primary,
    /// Any single replica
    Any,
    /// Quorum read with global strong barrier
    Strong,
    /// Quorum read tolerating bounded lag
    BoundedStaleness,
}

impl ReadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadMode::Primary => "primary",
            ReadMode::Any => "any",
            ReadMode::Strong => "strong",
            ReadMode::BoundedStaleness => "bounded_staleness",
        }
    }
}

/// Parameters of one multi-replica read.
#[derive(Debug, Clone, Copy)]
pub struct ReplicaReadOptions {
    pub include_primary: bool,
    pub replica_count_to_read: usize,
    pub requires_valid_lsn: bool,
    pub use_session_token: bool,
    pub read_mode: ReadMode,
    /// Only accept replicas whose session token dominates the request's
    pub check_min_lsn: bool,
    /// Read every resolved replica in one batch
    pub force_read_all: bool,
}

struct ReadReplicaResult {
    results: Vec<StoreResult>,
    retry_with_force_refresh: bool,
}

impl ReadReplicaResult {
    fn refresh_and_retry() -> Self {
        Self {
            results: Vec::new(),
            retry_with_force_refresh: true,
        }
    }

    fn done(results: Vec<StoreResult>) -> Self {
        Self {
            results,
            retry_with_force_refresh: false,
        }
    }
}

/// Fans reads out to replicas.
pub struct StoreReader {
    transport: Arc<dyn TransportClient>,
    address_selector: AddressSelector,
    random: Arc<dyn RandomSource>,
    metrics: Arc<MetricsRegistry>,
}

impl StoreReader {
    pub fn new(
        transport: Arc<dyn TransportClient>,
        address_selector: AddressSelector,
        random: Arc<dyn RandomSource>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            transport,
            address_selector,
            random,
            metrics,
        }
    }

    pub fn address_selector(&self) -> &AddressSelector {
        &self.address_selector
    }

    pub fn transport(&self) -> &Arc<dyn TransportClient> {
        &self.transport
    }

    /// Read up to `replica_count_to_read` replicas and return the accepted
    /// results. The caller's session header is restored afterwards.
    pub async fn read_multiple_replicas(
        &self,
        request: &mut ServiceRequest,
        options: ReplicaReadOptions,
    ) -> ConsistencyResult<Vec<StoreResult>> {
        let original = request
            .headers
            .get(header_names::SESSION_TOKEN)
            .map(str::to_string);

        let outcome = self.read_multiple_with_refresh(request, options).await;
        SessionTokenHelper::restore_session_token(request, original);
        outcome
    }

    async fn read_multiple_with_refresh(
        &self,
        request: &mut ServiceRequest,
        options: ReplicaReadOptions,
    ) -> ConsistencyResult<Vec<StoreResult>> {
        let mut result = self.read_multiple_internal(request, options).await?;
        if result.retry_with_force_refresh && !request.context.force_refresh_address_cache {
            log_event_with_fields(
                Event::AddressRefreshForced,
                &[("reason", "too few replica addresses")],
            );
            request.context.force_refresh_address_cache = true;
            result = self.read_multiple_internal(request, options).await?;
        }
        Ok(result.results)
    }

    async fn read_multiple_internal(
        &self,
        request: &mut ServiceRequest,
        options: ReplicaReadOptions,
    ) -> ConsistencyResult<ReadReplicaResult> {
        request.context.throw_if_elapsed()?;

        let force_refresh = request.context.force_refresh_address_cache;
        let mut candidates = self
            .address_selector
            .resolve_all_uris(request, options.include_primary, force_refresh)
            .await?;

        if candidates.len() < options.replica_count_to_read {
            if !force_refresh {
                return Ok(ReadReplicaResult::refresh_and_retry());
            }
            return Ok(ReadReplicaResult::done(Vec::new()));
        }

        let requested_token = self.prepare_session_token(request, options.use_session_token)?;

        if !candidates.is_empty() {
            let start = self.random.next_index(candidates.len());
            candidates.rotate_left(start);
        }

        let mut accepted: Vec<StoreResult> = Vec::new();
        let mut has_gone = false;
        let mut replicas_to_read = if options.force_read_all {
            candidates.len()
        } else {
            options.replica_count_to_read
        };

        while replicas_to_read > 0 && !candidates.is_empty() {
            let take = replicas_to_read.min(candidates.len());
            let batch: Vec<AddressInformation> = candidates.drain(..take).collect();

            for result in self.invoke_batch(request, &batch, options.requires_valid_lsn).await? {
                has_gone |= result.is_gone_exception;
                if Self::accepts(&result, requested_token.as_ref(), options.check_min_lsn)? {
                    accepted.push(result);
                }
            }

            if accepted.len() >= options.replica_count_to_read {
                break;
            }
            replicas_to_read = options.replica_count_to_read - accepted.len();
        }

        if accepted.len() < options.replica_count_to_read {
            tracing::debug!(
                target: "replicore",
                read_mode = options.read_mode.as_str(),
                accepted = accepted.len(),
                requested = options.replica_count_to_read,
                "fewer replica results than requested"
            );
        }

        if has_gone && !request.context.performed_background_address_refresh {
            self.start_background_address_refresh(request);
            request.context.performed_background_address_refresh = true;
        }

        Ok(ReadReplicaResult::done(accepted))
    }

    /// Read the primary replica (or the pinned one).
    pub async fn read_primary(
        &self,
        request: &mut ServiceRequest,
        requires_valid_lsn: bool,
        use_session_token: bool,
    ) -> ConsistencyResult<StoreResult> {
        let original = request
            .headers
            .get(header_names::SESSION_TOKEN)
            .map(str::to_string);

        let outcome = self
            .read_primary_with_refresh(request, requires_valid_lsn, use_session_token)
            .await;
        SessionTokenHelper::restore_session_token(request, original);
        outcome
    }

    async fn read_primary_with_refresh(
        &self,
        request: &mut ServiceRequest,
        requires_valid_lsn: bool,
        use_session_token: bool,
    ) -> ConsistencyResult<StoreResult> {
        let mut result = self
            .read_primary_internal(request, requires_valid_lsn, use_session_token, false)
            .await?;

        if result.retry_with_force_refresh && !request.context.force_refresh_address_cache {
            request.context.force_refresh_address_cache = true;
            result = self
                .read_primary_internal(request, requires_valid_lsn, use_session_token, true)
                .await?;
        }

        result.results.into_iter().next().ok_or_else(|| {
            StoreError::gone_with(sub_status::PRIMARY_NOT_FOUND, "primary result not found")
        })
    }

    async fn read_primary_internal(
        &self,
        request: &mut ServiceRequest,
        requires_valid_lsn: bool,
        use_session_token: bool,
        is_retry_after_refresh: bool,
    ) -> ConsistencyResult<ReadReplicaResult> {
        request.context.throw_if_elapsed()?;

        let force_refresh = request.context.force_refresh_address_cache;
        let primary = self
            .address_selector
            .resolve_primary_uri(request, force_refresh)
            .await?;

        self.prepare_session_token(request, use_session_token)?;

        let mut results = self
            .invoke_batch(request, std::slice::from_ref(&primary), requires_valid_lsn)
            .await?;
        let result = results.pop().ok_or_else(|| {
            StoreError::gone_with(sub_status::PRIMARY_NOT_FOUND, "primary did not answer")
        })?;

        if result.is_gone_exception && !is_retry_after_refresh {
            return Ok(ReadReplicaResult {
                results: vec![result],
                retry_with_force_refresh: true,
            });
        }
        Ok(ReadReplicaResult::done(vec![result]))
    }

    /// Attach the partition-local session token, or strip the header.
    fn prepare_session_token(
        &self,
        request: &mut ServiceRequest,
        use_session_token: bool,
    ) -> ConsistencyResult<Option<SessionToken>> {
        if use_session_token {
            SessionTokenHelper::set_partition_local_session_token(request)?;
            Ok(request.context.session_token.clone())
        } else {
            request.headers.remove(header_names::SESSION_TOKEN);
            Ok(None)
        }
    }

    fn accepts(
        result: &StoreResult,
        requested: Option<&SessionToken>,
        check_min_lsn: bool,
    ) -> ConsistencyResult<bool> {
        if !result.is_valid {
            return Ok(false);
        }
        if requested.is_none() || result.satisfies_session(requested)? {
            return Ok(true);
        }
        // Unless the floor is enforced, session lag only disqualifies a 404.
        Ok(!check_min_lsn && result.status != status::NOT_FOUND)
    }

    /// Send `request` to every replica of `batch` concurrently.
    async fn invoke_batch(
        &self,
        request: &ServiceRequest,
        batch: &[AddressInformation],
        requires_valid_lsn: bool,
    ) -> ConsistencyResult<Vec<StoreResult>> {
        self.metrics.increment_replica_calls(batch.len() as u64);

        let calls = batch.iter().map(|address| async move {
            let started = Instant::now();
            let outcome = self
                .transport
                .invoke(&address.uri, request)
                .await
                .map_err(StoreError::from);
            (address, outcome, started.elapsed())
        });

        let remaining = request.context.timeout_helper.remaining();
        let answers = tokio::time::timeout(remaining, join_all(calls))
            .await
            .map_err(|_| {
                StoreError::gone_with(
                    sub_status::TRANSPORT_TIMEOUT,
                    format!(
                        "request deadline elapsed while waiting on {} replicas",
                        batch.len()
                    ),
                )
            })?;

        let diagnostics = &request.context.diagnostics;
        let mut results = Vec::with_capacity(answers.len());
        for (address, outcome, latency) in answers {
            let result =
                StoreResult::from_outcome(outcome, Some(address.uri.clone()), requires_valid_lsn);
            if result.is_gone_exception {
                self.metrics.increment_gone_results();
            }
            diagnostics.record_response(&result, address.region.as_deref(), latency);
            results.push(result);
        }
        Ok(results)
    }

    /// Refresh replica addresses off the request path.
    ///
    /// Failures are logged and never reach the request.
    pub(crate) fn start_background_address_refresh(&self, request: &ServiceRequest) {
        let resolver = self.address_selector.resolver();
        let mut refresh_request = request.clone();
        refresh_request.context.clear_routing();
        refresh_request.context.diagnostics = Default::default();

        self.metrics.increment_background_refreshes();
        log_event_with_fields(
            Event::BackgroundRefreshStarted,
            &[("resource", request.resource_address.as_str())],
        );

        tokio::spawn(async move {
            let outcome = resolver.resolve_addresses(&mut refresh_request, true).await;
            if let Err(err) = outcome {
                log_event_with_fields(
                    Event::BackgroundRefreshFailed,
                    &[
                        ("resource", refresh_request.resource_address.as_str()),
                        ("error", err.to_string().as_str()),
                    ],
                );
            }
        });
    }
}
