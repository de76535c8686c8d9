//! Per-request mutable context
//!
//! Carries the routing decision, quorum bookkeeping and retry hints for one
//! logical request. Owned by the request and passed down by `&mut`; barrier
//! requests get a clone that shares the same diagnostics.

use std::sync::Arc;

use crate::config::ConsistencyLevel;
use crate::error::ConsistencyResult;
use crate::routing::{PartitionKeyRange, ServiceIdentity};
use crate::session::SessionToken;

use super::diagnostics::RequestDiagnostics;
use super::store_result::StoreResult;
use super::timeout::TimeoutHelper;

/// Context carried through resolution, replica reads and retries
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Collection rid the request was resolved against
    pub resolved_collection_rid: Option<String>,

    /// Partition key range the request was routed to
    pub resolved_partition_key_range: Option<PartitionKeyRange>,

    /// Backend replica-set identity the request was routed to
    pub target_identity: Option<ServiceIdentity>,

    /// LSN selected by a quorum read that has not yet been confirmed
    pub quorum_selected_lsn: i64,

    /// Global-committed LSN target of the pending barrier
    pub global_committed_selected_lsn: i64,

    /// Response selected by a quorum read awaiting its barrier
    pub quorum_selected_store_response: Option<StoreResult>,

    /// Write response awaiting the global strong barrier
    pub global_strong_write_store_result: Option<StoreResult>,

    /// Consistency the caller asked for, if it overrode the account default
    pub original_request_consistency_level: Option<ConsistencyLevel>,

    /// Partition-local session token sent to replicas
    pub session_token: Option<SessionToken>,

    /// Bypass the address cache on the next resolution
    pub force_refresh_address_cache: bool,

    /// Retry once with refreshed addresses after a gone response
    pub perform_local_refresh_on_gone: bool,

    /// A background refresh already ran for this request
    pub performed_background_address_refresh: bool,

    /// Preferred-location index to route to
    pub location_index_to_route: Option<usize>,

    /// Whether the location index counts within preferred locations
    pub use_preferred_locations: Option<bool>,

    /// Regional endpoint the request is routed to
    pub location_endpoint_to_route: Option<String>,

    /// Deadline for the whole logical request
    pub timeout_helper: TimeoutHelper,

    /// The current attempt retries an earlier one
    pub is_in_retry: bool,

    /// Replica statistics shared across concurrent calls
    pub diagnostics: Arc<RequestDiagnostics>,
}

impl RequestContext {
    /// Forget the routing decision so the next attempt resolves from scratch.
    pub fn clear_routing(&mut self) {
        self.target_identity = None;
        self.resolved_partition_key_range = None;
    }

    /// Forget a pending quorum selection.
    pub fn clear_quorum_progress(&mut self) {
        self.quorum_selected_lsn = -1;
        self.global_committed_selected_lsn = -1;
        self.quorum_selected_store_response = None;
    }

    /// Fail once the deadline passed: gone while retrying, timeout on the
    /// first attempt.
    pub fn throw_if_elapsed(&self) -> ConsistencyResult<()> {
        if self.is_in_retry {
            self.timeout_helper.throw_gone_if_elapsed()
        } else {
            self.timeout_helper.throw_timeout_if_elapsed()
        }
    }

    /// Route to a preferred-location index.
    pub fn route_to_location_index(&mut self, index: usize, use_preferred_locations: bool) {
        self.location_index_to_route = Some(index);
        self.use_preferred_locations = Some(use_preferred_locations);
        self.location_endpoint_to_route = None;
    }

    /// Route to a resolved regional endpoint.
    pub fn route_to_location_endpoint(&mut self, endpoint: impl Into<String>) {
        self.location_endpoint_to_route = Some(endpoint.into());
    }

    pub fn clear_route_to_location(&mut self) {
        self.location_index_to_route = None;
        self.use_preferred_locations = None;
        self.location_endpoint_to_route = None;
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            resolved_collection_rid: None,
            resolved_partition_key_range: None,
            target_identity: None,
            quorum_selected_lsn: -1,
            global_committed_selected_lsn: -1,
            quorum_selected_store_response: None,
            global_strong_write_store_result: None,
            original_request_consistency_level: None,
            session_token: None,
            force_refresh_address_cache: false,
            perform_local_refresh_on_gone: true,
            performed_background_address_refresh: false,
            location_index_to_route: None,
            use_preferred_locations: None,
            location_endpoint_to_route: None,
            timeout_helper: TimeoutHelper::default(),
            is_in_retry: false,
            diagnostics: Arc::new(RequestDiagnostics::new()),
        }
    }
}
