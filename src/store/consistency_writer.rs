//! Writes to the partition primary
//!
//! A write goes to the primary once. When the account runs global strong
//! and has read regions, the write is not acknowledged until some replica
//! reports a global committed LSN at or past the write's LSN. The write
//! result is cached on the request context so a retried attempt resumes the
//! barrier instead of sending the write again.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::time::{Duration, Instant};

use crate::config::{AccountConfig, ConsistencyLevel, SessionRetryConfig, WriteBarrierConfig};
use crate::error::{status, sub_status, ConsistencyResult, StoreError};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::retry::{self, Attempt, RetriableOperation, SessionTokenMismatchRetryPolicy};
use crate::session::SessionTokenHelper;

use super::barrier::BarrierRequestHelper;
use super::headers::header_names;
use super::reader::{ReadMode, ReplicaReadOptions, StoreReader};
use super::request::ServiceRequest;
use super::response::StoreResponse;
use super::store_result::StoreResult;

pub struct ConsistencyWriter {
    store_reader: Arc<StoreReader>,
    barrier_config: WriteBarrierConfig,
    session_retry: SessionRetryConfig,
    account: AccountConfig,
    metrics: Arc<MetricsRegistry>,
}

impl ConsistencyWriter {
    pub fn new(
        store_reader: Arc<StoreReader>,
        barrier_config: WriteBarrierConfig,
        session_retry: SessionRetryConfig,
        account: AccountConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store_reader,
            barrier_config,
            session_retry,
            account,
            metrics,
        }
    }

    /// Global strong applies when the account enables it and its default
    /// consistency is strong.
    pub fn is_global_strong_enabled(&self) -> bool {
        self.account.enable_global_strong
            && self.account.default_consistency_level == ConsistencyLevel::Strong
    }

    pub async fn write(
        &self,
        request: &mut ServiceRequest,
        attempt: Attempt,
    ) -> ConsistencyResult<StoreResponse> {
        let original = request
            .headers
            .get(header_names::SESSION_TOKEN)
            .map(str::to_string);
        if !self.account.use_multiple_write_locations {
            // Single-region writes never wait on a session.
            request.headers.remove(header_names::SESSION_TOKEN);
        }

        let mut policy = SessionTokenMismatchRetryPolicy::new(&self.session_retry);
        let outcome =
            retry::execute(&mut policy, request, &WriteAttempt { writer: self }, attempt).await;

        SessionTokenHelper::restore_session_token(request, original);
        outcome
    }

    async fn write_private(
        &self,
        request: &mut ServiceRequest,
        attempt: Attempt,
    ) -> ConsistencyResult<StoreResponse> {
        request.context.is_in_retry = attempt.is_in_retry;
        request.context.throw_if_elapsed()?;
        request.context.force_refresh_address_cache = attempt.force_refresh;

        if request.context.global_strong_write_store_result.is_none() {
            let result = self.send_to_primary(request, attempt.force_refresh).await?;

            if !self.should_perform_write_barrier(&result) {
                return result.to_response();
            }

            if result.lsn == -1 || result.global_committed_lsn == -1 {
                return Err(StoreError::write_barrier_not_met(format!(
                    "write to {} returned lsn {} and global committed lsn {}",
                    request.resource_address, result.lsn, result.global_committed_lsn
                )));
            }

            let (lsn, global_committed_lsn) = (result.lsn, result.global_committed_lsn);
            request.context.global_strong_write_store_result = Some(result);
            request.context.global_committed_selected_lsn = lsn;
            request.context.force_refresh_address_cache = false;

            if global_committed_lsn < lsn {
                self.wait_for_write_barrier(request, lsn).await?;
            }
        } else {
            let target = request.context.global_committed_selected_lsn;
            self.wait_for_write_barrier(request, target).await?;
        }

        match request.context.global_strong_write_store_result.as_ref() {
            Some(result) => result.to_response(),
            None => Err(StoreError::internal("global strong write result missing")),
        }
    }

    async fn send_to_primary(
        &self,
        request: &mut ServiceRequest,
        force_refresh: bool,
    ) -> ConsistencyResult<StoreResult> {
        let primary = self
            .store_reader
            .address_selector()
            .resolve_primary_uri(request, force_refresh)
            .await?;

        if self.account.use_multiple_write_locations {
            SessionTokenHelper::set_partition_local_session_token(request)?;
        }

        self.metrics.increment_replica_calls(1);
        let started = Instant::now();
        let remaining = request.context.timeout_helper.remaining();
        let outcome = match tokio::time::timeout(
            remaining,
            self.store_reader.transport().invoke(&primary.uri, request),
        )
        .await
        {
            Ok(outcome) => outcome.map_err(StoreError::from),
            // The write may have been applied; it is not safe to replay as gone.
            Err(_) => {
                return Err(StoreError::request_timeout(format!(
                    "write to primary {} did not complete before the deadline",
                    primary.uri
                )))
            }
        };

        if let Err(err) = &outcome {
            if err.is_gone_class() {
                self.metrics.increment_gone_results();
                self.store_reader.start_background_address_refresh(request);
                return Err(err.clone().with_replica(primary.uri.clone()));
            }
        }

        let result = StoreResult::from_outcome(outcome, Some(primary.uri.clone()), false);
        request.context.diagnostics.record_response(
            &result,
            primary.region.as_deref(),
            started.elapsed(),
        );
        Ok(result)
    }

    fn should_perform_write_barrier(&self, result: &StoreResult) -> bool {
        if !self.is_global_strong_enabled() || result.number_of_read_regions <= 0 {
            return false;
        }
        result.status < 300
            || result.status == status::CONFLICT
            || result.status == status::PRECONDITION_FAILED
            || (result.status == status::NOT_FOUND
                && result.sub_status != sub_status::READ_SESSION_NOT_AVAILABLE)
    }

    async fn wait_for_write_barrier(
        &self,
        request: &ServiceRequest,
        target_global_committed_lsn: i64,
    ) -> ConsistencyResult<()> {
        let mut barrier =
            BarrierRequestHelper::create_with_targets(request, -1, target_global_committed_lsn);
        let target = target_global_committed_lsn.to_string();
        log_event_with_fields(
            Event::WriteBarrierStarted,
            &[
                ("resource", request.resource_address.as_str()),
                ("target_global_committed_lsn", target.as_str()),
            ],
        );

        let max_retries = self.barrier_config.max_retries;
        let mut highest_seen = 0i64;
        for attempt in 1..=max_retries {
            barrier.context.throw_if_elapsed()?;
            self.metrics.increment_barrier_calls();

            let responses = self
                .store_reader
                .read_multiple_replicas(
                    &mut barrier,
                    ReplicaReadOptions {
                        include_primary: true,
                        replica_count_to_read: 1,
                        requires_valid_lsn: false,
                        use_session_token: false,
                        read_mode: ReadMode::Strong,
                        check_min_lsn: false,
                        force_read_all: true,
                    },
                )
                .await?;

            if responses
                .iter()
                .any(|response| response.global_committed_lsn >= target_global_committed_lsn)
            {
                return Ok(());
            }

            let batch_max = responses
                .iter()
                .map(|response| response.global_committed_lsn)
                .max()
                .unwrap_or(0);
            highest_seen = highest_seen.max(batch_max);

            // Only the first barrier call may bypass the address cache.
            barrier.context.force_refresh_address_cache = false;

            if attempt < max_retries {
                tokio::time::sleep(self.barrier_delay(attempt)).await;
            }
        }

        let highest = highest_seen.to_string();
        log_event_with_fields(
            Event::WriteBarrierNotMet,
            &[
                ("resource", request.resource_address.as_str()),
                ("target_global_committed_lsn", target.as_str()),
                ("highest_global_committed_lsn", highest.as_str()),
            ],
        );
        Err(StoreError::write_barrier_not_met(format!(
            "global committed lsn {} not reached after {} barrier reads, highest seen {}",
            target_global_committed_lsn, max_retries, highest_seen
        )))
    }

    fn barrier_delay(&self, attempt: u32) -> Duration {
        if attempt > self.barrier_config.max_short_retries {
            Duration::from_millis(self.barrier_config.retry_interval_ms)
        } else {
            Duration::from_millis(self.barrier_config.short_retry_interval_ms)
        }
    }
}

struct WriteAttempt<'w> {
    writer: &'w ConsistencyWriter,
}

impl RetriableOperation for WriteAttempt<'_> {
    type Output = StoreResponse;

    fn invoke<'a>(
        &'a self,
        request: &'a mut ServiceRequest,
        attempt: Attempt,
    ) -> BoxFuture<'a, ConsistencyResult<StoreResponse>> {
        Box::pin(self.writer.write_private(request, attempt))
    }
}
