//! Gone / RetryWith retries
//!
//! Absorbs the transient failures of a replicated partition: replicas that
//! moved (410), stale routing (name cache, migration, split) and 449
//! RetryWith conflicts. Retries back off exponentially inside a wall-clock
//! budget that is longer for strong reads and global-strong writes.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::config::GoneRetryConfig;
use crate::error::{sub_status, ErrorKind, StoreError};
use crate::observability::{log_event_with_fields, Event};
use crate::store::ServiceRequest;

use super::{RetryPolicy, ShouldRetry};

pub struct GoneAndRetryWithRetryPolicy {
    started_at: Instant,
    budget: Duration,
    current_backoff: Duration,
    backoff_multiplier: u32,
    max_backoff: Duration,
    attempt_count: u32,
    invalid_partition_count: u32,
    max_invalid_partition_retries: u32,
    min_failed_replicas_for_connectivity: usize,
    detect_connectivity_issues: bool,
    last_retry_with: Option<StoreError>,
}

impl GoneAndRetryWithRetryPolicy {
    /// `strong` selects the longer budget.
    pub fn new(config: &GoneRetryConfig, strong: bool) -> Self {
        let budget_secs = if strong {
            config.strong_budget_secs
        } else {
            config.budget_secs
        };
        Self {
            started_at: Instant::now(),
            budget: Duration::from_secs(budget_secs),
            current_backoff: Duration::from_secs(config.initial_backoff_secs),
            backoff_multiplier: config.backoff_multiplier.max(1) as u32,
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            attempt_count: 0,
            invalid_partition_count: 0,
            max_invalid_partition_retries: config.max_invalid_partition_retries,
            min_failed_replicas_for_connectivity: config.min_failed_replicas_for_connectivity,
            detect_connectivity_issues: config.detect_connectivity_issues,
            last_retry_with: None,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    fn handles(error: &StoreError, request: &ServiceRequest) -> bool {
        match error.kind {
            ErrorKind::Gone
            | ErrorKind::RetryWith
            | ErrorKind::PartitionIsMigrating
            | ErrorKind::PartitionKeyRangeIsSplitting
            | ErrorKind::PartitionKeyRangeGone => true,
            // An explicit range pinned to a collection cannot be re-resolved
            // by name.
            ErrorKind::InvalidPartition => request
                .partition_key_range_identity
                .as_ref()
                .map_or(true, |identity| identity.collection_rid.is_none()),
            _ => false,
        }
    }

    pub fn decide(&mut self, error: StoreError, request: &mut ServiceRequest) -> ShouldRetry {
        if !Self::handles(&error, request) {
            return ShouldRetry::No(error);
        }
        if error.kind == ErrorKind::RetryWith {
            self.last_retry_with = Some(error.clone());
        }
        self.attempt_count += 1;

        let elapsed = self.started_at.elapsed();
        if elapsed >= self.budget {
            return ShouldRetry::No(self.exhausted(error, request));
        }
        let remaining = self.budget - elapsed;

        let mut backoff = self.current_backoff.min(remaining).min(self.max_backoff);
        self.current_backoff *= self.backoff_multiplier;

        let attempt = self.attempt_count.to_string();
        let resource = request.resource_address.clone();
        let sub = error.sub_status.to_string();
        let fields = [
            ("attempt", attempt.as_str()),
            ("resource", resource.as_str()),
            ("sub_status", sub.as_str()),
        ];

        let force_refresh = match error.kind {
            ErrorKind::Gone => {
                let force_refresh = request.context.perform_local_refresh_on_gone;
                request.context.force_refresh_address_cache = force_refresh;
                log_event_with_fields(Event::GoneRetry, &fields);
                force_refresh
            }
            ErrorKind::PartitionIsMigrating => {
                request.context.clear_routing();
                request.context.clear_quorum_progress();
                request.force_collection_routing_map_refresh = true;
                request.force_master_refresh = true;
                backoff = Duration::ZERO;
                log_event_with_fields(Event::PartitionMigratingRetry, &fields);
                false
            }
            ErrorKind::InvalidPartition => {
                request.context.clear_routing();
                self.invalid_partition_count += 1;
                if self.invalid_partition_count > self.max_invalid_partition_retries {
                    return ShouldRetry::No(
                        StoreError::service_unavailable(
                            sub_status::GONE_AFTER_RETRIES,
                            "name cache stayed stale after refresh",
                        )
                        .with_cause(error),
                    );
                }
                request.force_name_cache_refresh = true;
                backoff = Duration::ZERO;
                log_event_with_fields(Event::InvalidPartitionRetry, &fields);
                false
            }
            ErrorKind::PartitionKeyRangeIsSplitting | ErrorKind::PartitionKeyRangeGone => {
                request.context.clear_routing();
                request.context.clear_quorum_progress();
                request.force_partition_key_range_refresh = true;
                log_event_with_fields(Event::PartitionSplittingRetry, &fields);
                false
            }
            _ => {
                log_event_with_fields(Event::RetryWithRetry, &fields);
                false
            }
        };

        ShouldRetry::After {
            backoff,
            force_refresh,
        }
    }

    fn exhausted(&mut self, error: StoreError, request: &ServiceRequest) -> StoreError {
        let elapsed_ms = self.started_at.elapsed().as_millis().to_string();
        log_event_with_fields(
            Event::RetryBudgetExhausted,
            &[
                ("resource", request.resource_address.as_str()),
                ("kind", error.kind.as_str()),
                ("elapsed_ms", elapsed_ms.as_str()),
            ],
        );

        if let Some(retry_with) = self.last_retry_with.take() {
            return retry_with;
        }

        if error.kind == ErrorKind::Gone {
            let mut message = String::from("replicas stayed unavailable for the retry budget");
            let failed = request.context.diagnostics.failed_replica_count();
            if self.detect_connectivity_issues
                && failed >= self.min_failed_replicas_for_connectivity
            {
                message.push_str(&format!(
                    "; {} replica calls failed, client connectivity may be impaired",
                    failed
                ));
            }
            return StoreError::service_unavailable(sub_status::GONE_AFTER_RETRIES, message)
                .with_cause(error);
        }

        StoreError::service_unavailable(
            sub_status::GONE_AFTER_RETRIES,
            format!("{} persisted for the retry budget", error.kind.as_str()),
        )
        .with_cause(error)
    }
}

impl RetryPolicy for GoneAndRetryWithRetryPolicy {
    fn should_retry<'a>(
        &'a mut self,
        error: StoreError,
        request: &'a mut ServiceRequest,
    ) -> BoxFuture<'a, ShouldRetry> {
        let decision = self.decide(error, request);
        Box::pin(async move { decision })
    }
}
