//! Quorum Reads
//!
//! Strong and bounded-staleness reads converge on a response that a read
//! quorum of replicas has durably observed.
//!
//! States of one attempt:
//!
//! ```text
//! QuorumNotSelected ──> QuorumSelected ──> QuorumMet
//!         │                   │
//!         └──────> primary fallback <──┘   (at most once per read)
//! ```
//!
//! Secondary replicas are read first. The response with the highest LSN is
//! selected; if fewer than a read quorum report it, barrier reads wait for
//! the replicas to catch up. Only when secondaries cannot converge is the
//! more expensive primary consulted.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AccountConfig, ConsistencyLevel, QuorumConfig};
use crate::error::{ConsistencyResult, StoreError};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

use super::barrier::BarrierRequestHelper;
use super::reader::{ReadMode, ReplicaReadOptions, StoreReader};
use super::request::ServiceRequest;
use super::response::StoreResponse;
use super::store_result::StoreResult;

/// Outcome of one secondary quorum read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadQuorumResultKind {
    QuorumMet,
    QuorumSelected,
    QuorumNotSelected,
}

impl ReadQuorumResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuorumMet => "quorum_met",
            Self::QuorumSelected => "quorum_selected",
            Self::QuorumNotSelected => "quorum_not_selected",
        }
    }
}

/// Result of a secondary quorum read.
#[derive(Debug, Clone)]
pub struct ReadQuorumResult {
    pub kind: ReadQuorumResultKind,
    pub selected_lsn: i64,
    pub global_committed_selected_lsn: i64,
    pub selected_response: Option<StoreResult>,
}

impl ReadQuorumResult {
    fn not_selected() -> Self {
        Self {
            kind: ReadQuorumResultKind::QuorumNotSelected,
            selected_lsn: -1,
            global_committed_selected_lsn: -1,
            selected_response: None,
        }
    }

    fn response(&self) -> ConsistencyResult<StoreResponse> {
        match &self.selected_response {
            Some(result) => result.to_response(),
            None => Err(StoreError::internal("quorum result has no selected response")),
        }
    }
}

/// Vote count over a set of replica results.
#[derive(Debug, Clone)]
pub struct QuorumEvaluation {
    pub is_met: bool,
    pub read_lsn: i64,
    pub global_committed_lsn: i64,
    pub selected_response: Option<StoreResult>,
}

/// Outcome of waiting for the primary to catch up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrimaryReadOutcome {
    QuorumMet,
    QuorumInconclusive,
    QuorumNotMet,
}

enum PrimaryReadResult {
    Success(StoreResult),
    RetryOnSecondary,
}

/// Drives quorum reads through a [`StoreReader`].
pub struct QuorumReader {
    store_reader: Arc<StoreReader>,
    config: QuorumConfig,
    account: AccountConfig,
    metrics: Arc<MetricsRegistry>,
}

impl QuorumReader {
    pub fn new(
        store_reader: Arc<StoreReader>,
        config: QuorumConfig,
        account: AccountConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store_reader,
            config,
            account,
            metrics,
        }
    }

    /// Strong read: a quorum-met response, a converged barrier, or the
    /// primary. Anything else is `ReadQuorumNotMet`.
    pub async fn read_strong(
        &self,
        request: &mut ServiceRequest,
        read_quorum: usize,
        read_mode: ReadMode,
    ) -> ConsistencyResult<StoreResponse> {
        let mut retries_left = self.config.max_read_quorum_retries;
        let mut has_performed_read_from_primary = false;

        loop {
            request.context.throw_if_elapsed()?;
            let mut should_retry_on_secondary = false;

            let secondary = self.read_quorum(request, read_quorum, false, read_mode).await?;
            match secondary.kind {
                ReadQuorumResultKind::QuorumMet => return secondary.response(),
                ReadQuorumResultKind::QuorumSelected => {
                    let mut barrier = BarrierRequestHelper::create_with_targets(
                        request,
                        secondary.selected_lsn,
                        secondary.global_committed_selected_lsn,
                    );
                    if self
                        .wait_for_read_barrier(
                            &mut barrier,
                            true,
                            read_quorum,
                            secondary.selected_lsn,
                            secondary.global_committed_selected_lsn,
                            read_mode,
                        )
                        .await?
                    {
                        self.metrics.increment_quorum_met();
                        return secondary.response();
                    }

                    log_event_with_fields(
                        Event::ReadBarrierNotMet,
                        &[
                            ("selected_lsn", secondary.selected_lsn.to_string().as_str()),
                            (
                                "global_committed_lsn",
                                secondary.global_committed_selected_lsn.to_string().as_str(),
                            ),
                        ],
                    );

                    // Keep the selection so a later attempt resumes from it.
                    request.context.quorum_selected_store_response =
                        secondary.selected_response.clone();
                    request.context.quorum_selected_lsn = secondary.selected_lsn;
                    request.context.global_committed_selected_lsn =
                        secondary.global_committed_selected_lsn;

                    if has_performed_read_from_primary {
                        return Err(Self::read_quorum_not_met(request));
                    }
                    match self.read_primary(request, read_quorum).await? {
                        PrimaryReadResult::Success(result) => return result.to_response(),
                        PrimaryReadResult::RetryOnSecondary => {
                            should_retry_on_secondary = true;
                            has_performed_read_from_primary = true;
                        }
                    }
                }
                ReadQuorumResultKind::QuorumNotSelected => {
                    if has_performed_read_from_primary {
                        return Err(Self::read_quorum_not_met(request));
                    }
                    match self.read_primary(request, read_quorum).await? {
                        PrimaryReadResult::Success(result) => return result.to_response(),
                        PrimaryReadResult::RetryOnSecondary => {
                            should_retry_on_secondary = true;
                            has_performed_read_from_primary = true;
                        }
                    }
                }
            }

            retries_left = retries_left.saturating_sub(1);
            if retries_left == 0 || !should_retry_on_secondary {
                return Err(Self::read_quorum_not_met(request));
            }
        }
    }

    /// Bounded-staleness read: a quorum-selected response is good enough.
    pub async fn read_bounded_staleness(
        &self,
        request: &mut ServiceRequest,
        read_quorum: usize,
    ) -> ConsistencyResult<StoreResponse> {
        let mut retries_left = self.config.max_read_quorum_retries;
        let mut has_performed_read_from_primary = false;

        loop {
            request.context.throw_if_elapsed()?;
            let mut should_retry_on_secondary = false;

            let secondary = self
                .read_quorum(request, read_quorum, false, ReadMode::BoundedStaleness)
                .await?;
            match secondary.kind {
                ReadQuorumResultKind::QuorumMet | ReadQuorumResultKind::QuorumSelected => {
                    return secondary.response();
                }
                ReadQuorumResultKind::QuorumNotSelected => {
                    if has_performed_read_from_primary {
                        return Err(Self::read_quorum_not_met(request));
                    }
                    match self.read_primary(request, read_quorum).await? {
                        PrimaryReadResult::Success(result) => return result.to_response(),
                        PrimaryReadResult::RetryOnSecondary => {
                            should_retry_on_secondary = true;
                            has_performed_read_from_primary = true;
                        }
                    }
                }
            }

            retries_left = retries_left.saturating_sub(1);
            if retries_left == 0 || !should_retry_on_secondary {
                return Err(Self::read_quorum_not_met(request));
            }
        }
    }

    fn read_quorum_not_met(request: &ServiceRequest) -> StoreError {
        log_event_with_fields(
            Event::ReadQuorumNotMet,
            &[("resource", request.resource_address.as_str())],
        );
        StoreError::read_quorum_not_met(format!(
            "read quorum not met for {}",
            request.resource_address
        ))
    }

    fn is_global_strong_read_candidate(&self, request: &ServiceRequest) -> bool {
        self.account.enable_global_strong
            && self.account.default_consistency_level == ConsistencyLevel::Strong
            && request
                .context
                .original_request_consistency_level
                .map_or(true, |level| level == ConsistencyLevel::Strong)
    }

    /// One secondary quorum read, resuming from a cached selection if a
    /// previous attempt left one on the context.
    pub async fn read_quorum(
        &self,
        request: &mut ServiceRequest,
        read_quorum: usize,
        include_primary: bool,
        read_mode: ReadMode,
    ) -> ConsistencyResult<ReadQuorumResult> {
        request.context.throw_if_elapsed()?;

        let (read_lsn, global_committed_lsn, selected) =
            match request.context.quorum_selected_store_response.clone() {
                Some(cached) => (
                    request.context.quorum_selected_lsn,
                    request.context.global_committed_selected_lsn,
                    Some(cached),
                ),
                None => {
                    let results = self
                        .store_reader
                        .read_multiple_replicas(
                            request,
                            ReplicaReadOptions {
                                include_primary,
                                replica_count_to_read: read_quorum,
                                requires_valid_lsn: true,
                                use_session_token: false,
                                read_mode,
                                check_min_lsn: false,
                                force_read_all: false,
                            },
                        )
                        .await?;

                    let valid = results.iter().filter(|r| r.is_valid).count();
                    if valid < read_quorum {
                        self.metrics.increment_quorum_not_selected();
                        log_event_with_fields(
                            Event::QuorumNotSelected,
                            &[
                                ("valid_responses", valid.to_string().as_str()),
                                ("read_quorum", read_quorum.to_string().as_str()),
                            ],
                        );
                        return Ok(ReadQuorumResult::not_selected());
                    }

                    let global_strong = self.is_global_strong_read_candidate(request);
                    let evaluation = Self::is_quorum_met(&results, read_quorum, global_strong);
                    if evaluation.is_met {
                        self.metrics.increment_quorum_met();
                        log_event_with_fields(
                            Event::QuorumMet,
                            &[("lsn", evaluation.read_lsn.to_string().as_str())],
                        );
                        return Ok(ReadQuorumResult {
                            kind: ReadQuorumResultKind::QuorumMet,
                            selected_lsn: evaluation.read_lsn,
                            global_committed_selected_lsn: evaluation.global_committed_lsn,
                            selected_response: evaluation.selected_response,
                        });
                    }

                    // Any needed address refresh already happened above.
                    request.context.force_refresh_address_cache = false;
                    (
                        evaluation.read_lsn,
                        evaluation.global_committed_lsn,
                        evaluation.selected_response,
                    )
                }
            };

        self.metrics.increment_quorum_selected();
        log_event_with_fields(
            Event::QuorumSelected,
            &[
                ("lsn", read_lsn.to_string().as_str()),
                ("global_committed_lsn", global_committed_lsn.to_string().as_str()),
            ],
        );

        let mut barrier =
            BarrierRequestHelper::create_with_targets(request, read_lsn, global_committed_lsn);
        let converged = self
            .wait_for_read_barrier(
                &mut barrier,
                false,
                read_quorum,
                read_lsn,
                global_committed_lsn,
                read_mode,
            )
            .await?;

        Ok(ReadQuorumResult {
            kind: if converged {
                ReadQuorumResultKind::QuorumMet
            } else {
                ReadQuorumResultKind::QuorumSelected
            },
            selected_lsn: read_lsn,
            global_committed_selected_lsn: global_committed_lsn,
            selected_response: selected,
        })
    }

    /// Count votes.
    ///
    /// Met when at least `read_quorum` valid replicas report the highest LSN
    /// (and, for global strong reads, some replica's global-committed LSN
    /// reaches it), or when enough valid replicas answered and the selected
    /// item LSN is not above any of their LSNs.
    pub fn is_quorum_met(
        results: &[StoreResult],
        read_quorum: usize,
        is_global_strong_read: bool,
    ) -> QuorumEvaluation {
        let valid: Vec<&StoreResult> = results.iter().filter(|r| r.is_valid).collect();
        if valid.is_empty() {
            return QuorumEvaluation {
                is_met: false,
                read_lsn: 0,
                global_committed_lsn: -1,
                selected_response: None,
            };
        }

        let number_of_read_regions = valid
            .iter()
            .map(|r| r.number_of_read_regions)
            .max()
            .unwrap_or(0);
        let check_global_strong = is_global_strong_read && number_of_read_regions > 0;

        let mut max_lsn = 0i64;
        let mut min_lsn = i64::MAX;
        let mut replica_count_max_lsn = 0usize;
        for result in &valid {
            if result.lsn == max_lsn {
                replica_count_max_lsn += 1;
            } else if result.lsn > max_lsn {
                replica_count_max_lsn = 1;
                max_lsn = result.lsn;
            }
            min_lsn = min_lsn.min(result.lsn);
        }

        let selected = valid
            .iter()
            .find(|r| r.lsn == max_lsn && r.status < 500)
            .or_else(|| valid.iter().find(|r| r.lsn == max_lsn))
            .map(|r| (*r).clone());

        let item_lsn = selected.as_ref().map_or(-1, |r| r.item_lsn);
        let read_lsn = if item_lsn == -1 {
            max_lsn
        } else {
            item_lsn.min(max_lsn)
        };
        let global_committed_lsn = if check_global_strong { read_lsn } else { -1 };
        let max_global_committed_lsn = valid
            .iter()
            .map(|r| r.global_committed_lsn)
            .max()
            .unwrap_or(-1);

        let head_quorum = read_lsn > 0
            && replica_count_max_lsn >= read_quorum
            && (!check_global_strong || max_global_committed_lsn >= max_lsn);

        let item_quorum = !head_quorum
            && valid.len() >= read_quorum
            && item_lsn != -1
            && min_lsn != i64::MAX
            && item_lsn <= min_lsn
            && (!check_global_strong || item_lsn <= max_global_committed_lsn);

        QuorumEvaluation {
            is_met: head_quorum || item_quorum,
            read_lsn,
            global_committed_lsn,
            selected_response: selected,
        }
    }

    /// Poll replicas until a read quorum reports `target_lsn` (and, for
    /// global strong, some replica's global-committed LSN reaches its target).
    async fn wait_for_read_barrier(
        &self,
        barrier: &mut ServiceRequest,
        allow_primary: bool,
        read_quorum: usize,
        target_lsn: i64,
        target_global_committed_lsn: i64,
        read_mode: ReadMode,
    ) -> ConsistencyResult<bool> {
        let options = ReplicaReadOptions {
            include_primary: allow_primary,
            replica_count_to_read: read_quorum,
            requires_valid_lsn: true,
            use_session_token: false,
            read_mode,
            check_min_lsn: false,
            force_read_all: true,
        };
        let converged = |results: &[StoreResult]| {
            let caught_up = results.iter().filter(|r| r.lsn >= target_lsn).count();
            let max_gclsn = results.iter().map(|r| r.global_committed_lsn).max().unwrap_or(0);
            caught_up >= read_quorum
                && (target_global_committed_lsn <= 0 || max_gclsn >= target_global_committed_lsn)
        };

        let mut retries_left = self.config.max_barrier_read_retries;
        while retries_left > 0 {
            retries_left -= 1;
            barrier.context.throw_if_elapsed()?;

            self.metrics.increment_barrier_calls();
            let results = self
                .store_reader
                .read_multiple_replicas(barrier, options)
                .await?;
            if converged(&results) {
                return Ok(true);
            }

            // Only the first barrier call may refresh addresses.
            barrier.context.force_refresh_address_cache = false;
            if retries_left > 0 {
                tokio::time::sleep(self.config.barrier_retry_interval()).await;
            }
        }

        if target_global_committed_lsn > 0 {
            let max_retries = self.config.max_barrier_retries_multi_region;
            for attempt in 0..max_retries {
                barrier.context.throw_if_elapsed()?;

                self.metrics.increment_barrier_calls();
                let results = self
                    .store_reader
                    .read_multiple_replicas(barrier, options)
                    .await?;
                if converged(&results) {
                    return Ok(true);
                }

                let delay_ms = if attempt < self.config.max_short_barrier_retries_multi_region {
                    self.config.short_barrier_retry_interval_multi_region_ms
                } else {
                    self.config.barrier_retry_interval_multi_region_ms
                };
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        Ok(false)
    }

    /// Read the primary and reconcile its LSN with its quorum-acked LSN.
    async fn read_primary(
        &self,
        request: &mut ServiceRequest,
        read_quorum: usize,
    ) -> ConsistencyResult<PrimaryReadResult> {
        request.context.throw_if_elapsed()?;
        self.metrics.increment_primary_fallbacks();
        log_event_with_fields(
            Event::PrimaryFallback,
            &[("resource", request.resource_address.as_str())],
        );

        // Addresses were refreshed on the secondary path if needed.
        request.context.force_refresh_address_cache = false;
        let result = self.store_reader.read_primary(request, true, false).await?;
        if !result.is_valid {
            return Err(result
                .to_response()
                .err()
                .unwrap_or_else(|| StoreError::internal("invalid primary result")));
        }

        if result.current_replica_set_size <= 0 || result.lsn < 0 || result.quorum_acked_lsn < 0 {
            tracing::error!(
                target: "replicore",
                replica_set_size = result.current_replica_set_size,
                lsn = result.lsn,
                quorum_acked_lsn = result.quorum_acked_lsn,
                "primary returned incomplete replication headers"
            );
            return Err(StoreError::read_quorum_not_met(
                "primary returned incomplete replication headers",
            ));
        }

        if result.current_replica_set_size > read_quorum as i64 {
            log_event_with_fields(
                Event::PrimaryReplicaSetTooLarge,
                &[
                    (
                        "replica_set_size",
                        result.current_replica_set_size.to_string().as_str(),
                    ),
                    ("read_quorum", read_quorum.to_string().as_str()),
                ],
            );
            return Ok(PrimaryReadResult::RetryOnSecondary);
        }

        if result.lsn != result.quorum_acked_lsn {
            let higher_lsn = result.lsn.max(result.quorum_acked_lsn);
            let mut wait_request =
                BarrierRequestHelper::create_with_targets(request, higher_lsn, -1);
            return match self
                .wait_for_primary_lsn(&mut wait_request, higher_lsn, read_quorum)
                .await?
            {
                PrimaryReadOutcome::QuorumMet => Ok(PrimaryReadResult::Success(result)),
                PrimaryReadOutcome::QuorumInconclusive => Ok(PrimaryReadResult::RetryOnSecondary),
                PrimaryReadOutcome::QuorumNotMet => Err(StoreError::read_quorum_not_met(
                    format!("primary did not reach lsn {}", higher_lsn),
                )),
            };
        }

        Ok(PrimaryReadResult::Success(result))
    }

    async fn wait_for_primary_lsn(
        &self,
        barrier: &mut ServiceRequest,
        target_lsn: i64,
        read_quorum: usize,
    ) -> ConsistencyResult<PrimaryReadOutcome> {
        for attempt in 0..self.config.max_primary_read_retries {
            barrier.context.throw_if_elapsed()?;
            barrier.context.force_refresh_address_cache = false;

            self.metrics.increment_barrier_calls();
            let result = self.store_reader.read_primary(barrier, true, false).await?;
            if !result.is_valid {
                return Err(result
                    .to_response()
                    .err()
                    .unwrap_or_else(|| StoreError::internal("invalid primary result")));
            }

            if result.current_replica_set_size > read_quorum as i64 {
                return Ok(PrimaryReadOutcome::QuorumInconclusive);
            }

            if result.lsn >= target_lsn && result.quorum_acked_lsn >= target_lsn {
                return Ok(PrimaryReadOutcome::QuorumMet);
            }

            if attempt + 1 < self.config.max_primary_read_retries {
                tokio::time::sleep(self.config.barrier_retry_interval()).await;
            }
        }

        Ok(PrimaryReadOutcome::QuorumNotMet)
    }
}
