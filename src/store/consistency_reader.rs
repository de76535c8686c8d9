//! Consistency-driven reads
//!
//! Chooses a read strategy from the effective consistency level:
//!
//! | Level                                   | Mode               |
//! |-----------------------------------------|--------------------|
//! | pinned replica (`default_replica_index`) | Primary            |
//! | Eventual, ConsistentPrefix              | Any                |
//! | Session                                 | Any + session check |
//! | BoundedStaleness                        | quorum, selected ok |
//! | Strong                                  | quorum             |

use std::sync::Arc;

use crate::config::{AccountConfig, ConsistencyLevel, QuorumConfig};
use crate::error::{ConsistencyResult, StoreError};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::retry::Attempt;

use super::quorum::QuorumReader;
use super::reader::{ReadMode, ReplicaReadOptions, StoreReader};
use super::request::ServiceRequest;
use super::response::StoreResponse;

/// Read strategy and the level it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPlan {
    pub mode: ReadMode,
    pub consistency_level: ConsistencyLevel,
    pub use_session_token: bool,
}

pub struct ConsistencyReader {
    store_reader: Arc<StoreReader>,
    quorum_reader: QuorumReader,
    account: AccountConfig,
}

impl ConsistencyReader {
    pub fn new(
        store_reader: Arc<StoreReader>,
        quorum_config: QuorumConfig,
        account: AccountConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let quorum_reader = QuorumReader::new(
            Arc::clone(&store_reader),
            quorum_config,
            account.clone(),
            metrics,
        );
        Self {
            store_reader,
            quorum_reader,
            account,
        }
    }

    pub async fn read(
        &self,
        request: &mut ServiceRequest,
        attempt: Attempt,
    ) -> ConsistencyResult<StoreResponse> {
        request.context.is_in_retry = attempt.is_in_retry;
        request.context.throw_if_elapsed()?;
        request.context.force_refresh_address_cache = attempt.force_refresh;

        let plan = self.deduce_read_mode(request)?;
        let read_quorum = self.read_quorum(request);

        match plan.mode {
            ReadMode::Primary => {
                let result = self
                    .store_reader
                    .read_primary(request, false, plan.use_session_token)
                    .await?;
                result.to_response()
            }
            ReadMode::Any if plan.consistency_level == ConsistencyLevel::Session => {
                self.read_session(request).await
            }
            ReadMode::Any => self.read_any(request).await,
            ReadMode::Strong => {
                request.context.perform_local_refresh_on_gone = true;
                self.quorum_reader
                    .read_strong(request, read_quorum, ReadMode::Strong)
                    .await
            }
            ReadMode::BoundedStaleness => {
                request.context.perform_local_refresh_on_gone = true;
                self.quorum_reader
                    .read_bounded_staleness(request, read_quorum)
                    .await
            }
        }
    }

    /// Effective consistency: the request override, which may only weaken
    /// the account default.
    pub fn effective_consistency_level(
        &self,
        request: &mut ServiceRequest,
    ) -> ConsistencyResult<ConsistencyLevel> {
        let default = self.account.default_consistency_level;
        match request.requested_consistency_level()? {
            Some(level) if level.is_stronger_than(default) => Err(StoreError::bad_request(format!(
                "requested consistency {} is stronger than the account default {}",
                level, default
            ))),
            Some(level) => {
                request.context.original_request_consistency_level = Some(level);
                Ok(level)
            }
            None => Ok(default),
        }
    }

    pub fn deduce_read_mode(&self, request: &mut ServiceRequest) -> ConsistencyResult<ReadPlan> {
        let level = self.effective_consistency_level(request)?;

        // Pinned reads are internal and never session-scoped.
        if request.default_replica_index.is_some() {
            return Ok(ReadPlan {
                mode: ReadMode::Primary,
                consistency_level: level,
                use_session_token: false,
            });
        }

        let mode = match level {
            ConsistencyLevel::Eventual
            | ConsistencyLevel::ConsistentPrefix
            | ConsistencyLevel::Session => ReadMode::Any,
            ConsistencyLevel::BoundedStaleness => ReadMode::BoundedStaleness,
            ConsistencyLevel::Strong => ReadMode::Strong,
        };
        Ok(ReadPlan {
            mode,
            consistency_level: level,
            use_session_token: level == ConsistencyLevel::Session,
        })
    }

    fn read_quorum(&self, request: &ServiceRequest) -> usize {
        if request.is_reading_from_master() {
            self.account.system_replication_policy.read_quorum()
        } else {
            self.account.user_replication_policy.read_quorum()
        }
    }

    async fn read_any(&self, request: &mut ServiceRequest) -> ConsistencyResult<StoreResponse> {
        let results = self
            .store_reader
            .read_multiple_replicas(
                request,
                ReplicaReadOptions {
                    include_primary: true,
                    replica_count_to_read: 1,
                    requires_valid_lsn: false,
                    use_session_token: false,
                    read_mode: ReadMode::Any,
                    check_min_lsn: false,
                    force_read_all: false,
                },
            )
            .await?;

        match results.first() {
            Some(result) => result.to_response(),
            None => Err(StoreError::gone(format!(
                "no replica answered for {}",
                request.resource_address
            ))),
        }
    }

    async fn read_session(&self, request: &mut ServiceRequest) -> ConsistencyResult<StoreResponse> {
        request.context.throw_if_elapsed()?;

        let results = self
            .store_reader
            .read_multiple_replicas(
                request,
                ReplicaReadOptions {
                    include_primary: true,
                    replica_count_to_read: 1,
                    requires_valid_lsn: true,
                    use_session_token: true,
                    read_mode: ReadMode::Any,
                    check_min_lsn: true,
                    force_read_all: false,
                },
            )
            .await?;

        if let Some(result) = results.first() {
            return result.to_response();
        }

        let requested = request
            .context
            .session_token
            .as_ref()
            .map(|token| token.convert_to_string())
            .unwrap_or_default();
        log_event_with_fields(
            Event::SessionNotAvailable,
            &[
                ("resource", request.resource_address.as_str()),
                ("session_token", requested.as_str()),
            ],
        );
        Err(StoreError::session_not_available(format!(
            "no replica has caught up to session token '{}'",
            requested
        )))
    }
}
