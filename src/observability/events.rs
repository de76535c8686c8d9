//! Observable consistency events
//!
//! Events are explicit and typed. Each quorum outcome, barrier result,
//! retry decision and invariant violation maps to exactly one event.

use std::fmt;

use super::logger::Severity;

/// Observable events in the consistency core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Address resolution
    /// Collection or routing map cache refreshed during resolution
    RoutingCacheRefreshed,
    /// Master identity refreshed after a failed master address lookup
    MasterIdentityRefreshed,
    /// Retried request resolved to an unrelated partition
    TargetPartitionChanged,
    /// Background address refresh started after a gone response
    BackgroundRefreshStarted,
    /// Background address refresh failed (never surfaced)
    BackgroundRefreshFailed,

    // Replica reads
    /// Too few replica addresses; retrying with forced refresh
    AddressRefreshForced,
    /// No replica satisfied the requested session token
    SessionNotAvailable,

    // Quorum
    /// Read quorum met
    QuorumMet,
    /// Candidate LSN selected but not yet confirmed by a quorum
    QuorumSelected,
    /// Not enough valid responses to select a candidate
    QuorumNotSelected,
    /// Read barrier did not converge
    ReadBarrierNotMet,
    /// Falling back to the primary replica
    PrimaryFallback,
    /// Primary replica set larger than read quorum
    PrimaryReplicaSetTooLarge,
    /// Read quorum exhausted on both paths
    ReadQuorumNotMet,

    // Writes
    /// Global strong write barrier started
    WriteBarrierStarted,
    /// Global strong write barrier did not converge
    WriteBarrierNotMet,

    // Retries
    /// Gone response, retrying with refreshed addresses
    GoneRetry,
    /// Name cache stale, retrying
    InvalidPartitionRetry,
    /// Partition migrating, retrying
    PartitionMigratingRetry,
    /// Partition splitting, retrying
    PartitionSplittingRetry,
    /// Retry-with observed
    RetryWithRetry,
    /// Retry budget exhausted
    RetryBudgetExhausted,
    /// Session token mismatch, retrying
    SessionTokenMismatchRetry,
    /// Endpoint marked unavailable
    EndpointMarkedUnavailable,
    /// Request throttled, retrying after the suggested delay
    ThrottleRetry,

    // Invariants
    /// Session token region sets disagree at equal version
    SessionTokenInvariantViolated,
    /// Replica returned headers that violate protocol invariants
    InvalidResponseHeaders,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::RoutingCacheRefreshed => "ROUTING_CACHE_REFRESHED",
            Event::MasterIdentityRefreshed => "MASTER_IDENTITY_REFRESHED",
            Event::TargetPartitionChanged => "TARGET_PARTITION_CHANGED",
            Event::BackgroundRefreshStarted => "BACKGROUND_REFRESH_STARTED",
            Event::BackgroundRefreshFailed => "BACKGROUND_REFRESH_FAILED",

            Event::AddressRefreshForced => "ADDRESS_REFRESH_FORCED",
            Event::SessionNotAvailable => "SESSION_NOT_AVAILABLE",

            Event::QuorumMet => "QUORUM_MET",
            Event::QuorumSelected => "QUORUM_SELECTED",
            Event::QuorumNotSelected => "QUORUM_NOT_SELECTED",
            Event::ReadBarrierNotMet => "READ_BARRIER_NOT_MET",
            Event::PrimaryFallback => "PRIMARY_FALLBACK",
            Event::PrimaryReplicaSetTooLarge => "PRIMARY_REPLICA_SET_TOO_LARGE",
            Event::ReadQuorumNotMet => "READ_QUORUM_NOT_MET",

            Event::WriteBarrierStarted => "WRITE_BARRIER_STARTED",
            Event::WriteBarrierNotMet => "WRITE_BARRIER_NOT_MET",

            Event::GoneRetry => "GONE_RETRY",
            Event::InvalidPartitionRetry => "INVALID_PARTITION_RETRY",
            Event::PartitionMigratingRetry => "PARTITION_MIGRATING_RETRY",
            Event::PartitionSplittingRetry => "PARTITION_SPLITTING_RETRY",
            Event::RetryWithRetry => "RETRY_WITH_RETRY",
            Event::RetryBudgetExhausted => "RETRY_BUDGET_EXHAUSTED",
            Event::SessionTokenMismatchRetry => "SESSION_TOKEN_MISMATCH_RETRY",
            Event::EndpointMarkedUnavailable => "ENDPOINT_MARKED_UNAVAILABLE",
            Event::ThrottleRetry => "THROTTLE_RETRY",

            Event::SessionTokenInvariantViolated => "SESSION_TOKEN_INVARIANT_VIOLATED",
            Event::InvalidResponseHeaders => "INVALID_RESPONSE_HEADERS",
        }
    }

    /// Default severity for this event
    pub fn severity(&self) -> Severity {
        match self {
            Event::SessionTokenInvariantViolated | Event::InvalidResponseHeaders => Severity::Fatal,
            Event::TargetPartitionChanged
            | Event::BackgroundRefreshFailed
            | Event::ReadQuorumNotMet
            | Event::WriteBarrierNotMet
            | Event::RetryBudgetExhausted => Severity::Error,
            Event::QuorumSelected
            | Event::QuorumNotSelected
            | Event::ReadBarrierNotMet
            | Event::PrimaryFallback
            | Event::PrimaryReplicaSetTooLarge
            | Event::SessionNotAvailable
            | Event::GoneRetry
            | Event::InvalidPartitionRetry
            | Event::PartitionMigratingRetry
            | Event::PartitionSplittingRetry
            | Event::RetryWithRetry
            | Event::SessionTokenMismatchRetry
            | Event::EndpointMarkedUnavailable
            | Event::ThrottleRetry => Severity::Warn,
            Event::QuorumMet | Event::AddressRefreshForced => Severity::Trace,
            Event::RoutingCacheRefreshed
            | Event::MasterIdentityRefreshed
            | Event::BackgroundRefreshStarted
            | Event::WriteBarrierStarted => Severity::Info,
        }
    }

    /// Returns true if this event indicates a protocol invariant violation
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
