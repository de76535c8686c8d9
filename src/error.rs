//! Store Error Types
//!
//! Every failure the consistency core can observe or synthesize is a
//! [`StoreError`] tagged with a closed [`ErrorKind`]. Retry policies match on
//! the kind exhaustively; the raw status and sub-status stay available for
//! diagnostics and for classification of transport responses.
//!
//! Classes:
//! - Gone-class: replica or partition temporarily unreachable, retriable
//! - Routing-stale: InvalidPartition, PartitionKeyRangeGone, splitting, migrating
//! - Terminal: BadRequest, InternalServerError, InvalidTarget

use std::fmt;

use thiserror::Error;

use crate::store::Headers;

/// HTTP-like status codes carried by replica responses.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const NOT_MODIFIED: u16 = 304;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const CONFLICT: u16 = 409;
    pub const GONE: u16 = 410;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const RETRY_WITH: u16 = 449;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Sub-status codes refining a status.
pub mod sub_status {
    pub const UNKNOWN: u32 = 0;

    // 403
    pub const WRITE_FORBIDDEN: u32 = 3;
    pub const COMPLETING_PARTITION_MIGRATION: u32 = 1008;

    // 404
    pub const READ_SESSION_NOT_AVAILABLE: u32 = 1002;

    // 410
    pub const NAME_CACHE_IS_STALE: u32 = 1000;
    pub const PARTITION_KEY_RANGE_GONE: u32 = 1002;
    pub const COMPLETING_SPLIT: u32 = 1007;
    pub const PARTITION_MIGRATING: u32 = 1008;

    // 400
    pub const PARTITION_KEY_MISMATCH: u32 = 1001;
    pub const MISSING_PARTITION_KEY: u32 = 1004;
    pub const MALFORMED_SESSION_TOKEN: u32 = 1005;

    // client generated
    pub const TRANSPORT_TIMEOUT: u32 = 20001;
    pub const CONNECTION_BROKEN: u32 = 20002;
    pub const READ_QUORUM_NOT_MET: u32 = 21007;
    pub const GLOBAL_STRONG_WRITE_BARRIER_NOT_MET: u32 = 21008;
    pub const PRIMARY_NOT_FOUND: u32 = 21009;
    pub const GONE_AFTER_RETRIES: u32 = 21010;
    pub const SESSION_TOKEN_INVARIANT: u32 = 21011;
    pub const TARGET_CHANGED: u32 = 21012;
}

/// Classified failure outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Replica unreachable or topology moved (410 without a routing sub-status)
    Gone,
    /// Name cache is stale (410/1000)
    InvalidPartition,
    /// Partition key range no longer exists (410/1002)
    PartitionKeyRangeGone,
    /// Partition is completing a split (410/1007)
    PartitionKeyRangeIsSplitting,
    /// Partition is migrating (410/1008)
    PartitionIsMigrating,
    /// Requested session progress not observed on the replica (404/1002)
    SessionNotAvailable,
    /// Backend asks the client to retry (449)
    RetryWith,
    /// Resource not found (404)
    NotFound,
    /// Write region no longer accepts writes (403/3)
    WriteForbidden,
    /// Region still completing a migration (403/1008)
    CompletingPartitionMigration,
    /// Other forbidden responses
    Forbidden,
    /// Request rate too large (429)
    TooManyRequests,
    /// Deadline exceeded on the first attempt (408)
    RequestTimeout,
    /// Retry budget exhausted or backend unavailable (503)
    ServiceUnavailable,
    /// Malformed input (400)
    BadRequest,
    /// Retried request resolved to an unrelated partition
    InvalidTarget,
    /// Protocol invariant violated (500)
    InternalServerError,
    /// Conflict (409)
    Conflict,
    /// Precondition failed (412)
    PreconditionFailed,
    /// Unauthorized (401)
    Unauthorized,
    /// Any other status
    Other,
}

impl ErrorKind {
    /// Classify a `(status, sub_status)` pair.
    pub fn classify(status: u16, sub_status: u32) -> Self {
        match (status, sub_status) {
            (status::GONE, sub_status::NAME_CACHE_IS_STALE) => Self::InvalidPartition,
            (status::GONE, sub_status::PARTITION_KEY_RANGE_GONE) => Self::PartitionKeyRangeGone,
            (status::GONE, sub_status::COMPLETING_SPLIT) => Self::PartitionKeyRangeIsSplitting,
            (status::GONE, sub_status::PARTITION_MIGRATING) => Self::PartitionIsMigrating,
            (status::GONE, _) => Self::Gone,
            (status::NOT_FOUND, sub_status::READ_SESSION_NOT_AVAILABLE) => {
                Self::SessionNotAvailable
            }
            (status::NOT_FOUND, _) => Self::NotFound,
            (status::FORBIDDEN, sub_status::WRITE_FORBIDDEN) => Self::WriteForbidden,
            (status::FORBIDDEN, sub_status::COMPLETING_PARTITION_MIGRATION) => {
                Self::CompletingPartitionMigration
            }
            (status::FORBIDDEN, _) => Self::Forbidden,
            (status::RETRY_WITH, _) => Self::RetryWith,
            (status::TOO_MANY_REQUESTS, _) => Self::TooManyRequests,
            (status::REQUEST_TIMEOUT, _) => Self::RequestTimeout,
            (status::SERVICE_UNAVAILABLE, _) => Self::ServiceUnavailable,
            (status::BAD_REQUEST, _) => Self::BadRequest,
            (status::INTERNAL_SERVER_ERROR, sub_status::TARGET_CHANGED) => Self::InvalidTarget,
            (status::INTERNAL_SERVER_ERROR, _) => Self::InternalServerError,
            (status::CONFLICT, _) => Self::Conflict,
            (status::PRECONDITION_FAILED, _) => Self::PreconditionFailed,
            (status::UNAUTHORIZED, _) => Self::Unauthorized,
            _ => Self::Other,
        }
    }

    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gone => "GONE",
            Self::InvalidPartition => "INVALID_PARTITION",
            Self::PartitionKeyRangeGone => "PARTITION_KEY_RANGE_GONE",
            Self::PartitionKeyRangeIsSplitting => "PARTITION_KEY_RANGE_IS_SPLITTING",
            Self::PartitionIsMigrating => "PARTITION_IS_MIGRATING",
            Self::SessionNotAvailable => "SESSION_NOT_AVAILABLE",
            Self::RetryWith => "RETRY_WITH",
            Self::NotFound => "NOT_FOUND",
            Self::WriteForbidden => "WRITE_FORBIDDEN",
            Self::CompletingPartitionMigration => "COMPLETING_PARTITION_MIGRATION",
            Self::Forbidden => "FORBIDDEN",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::BadRequest => "BAD_REQUEST",
            Self::InvalidTarget => "INVALID_TARGET",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::Conflict => "CONFLICT",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Store error
#[derive(Debug, Clone, Error)]
#[error("{kind} ({status}/{sub_status}): {message}")]
pub struct StoreError {
    /// Classified kind
    pub kind: ErrorKind,
    /// Status code
    pub status: u16,
    /// Sub-status code
    pub sub_status: u32,
    /// Error message
    pub message: String,
    /// Response headers, when the error came from a replica
    pub headers: Headers,
    /// Replica the error came from
    pub replica_uri: Option<String>,
    /// Original error when this one was synthesized from it
    #[source]
    pub cause: Option<Box<StoreError>>,
}

impl StoreError {
    /// Create an error from a status pair, classifying its kind.
    pub fn from_status(status: u16, sub_status: u32, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::classify(status, sub_status),
            status,
            sub_status,
            message: message.into(),
            headers: Headers::new(),
            replica_uri: None,
            cause: None,
        }
    }

    /// Create a plain gone error.
    pub fn gone(message: impl Into<String>) -> Self {
        Self::from_status(status::GONE, sub_status::UNKNOWN, message)
    }

    /// Create a gone error with a client-generated sub-status.
    pub fn gone_with(sub_status: u32, message: impl Into<String>) -> Self {
        let mut err = Self::from_status(status::GONE, sub_status, message);
        err.kind = ErrorKind::Gone;
        err
    }

    /// Read quorum could not be reached.
    pub fn read_quorum_not_met(message: impl Into<String>) -> Self {
        Self::gone_with(sub_status::READ_QUORUM_NOT_MET, message)
    }

    /// Global strong write barrier did not converge.
    pub fn write_barrier_not_met(message: impl Into<String>) -> Self {
        Self::gone_with(sub_status::GLOBAL_STRONG_WRITE_BARRIER_NOT_MET, message)
    }

    /// Name cache is stale.
    pub fn invalid_partition(message: impl Into<String>) -> Self {
        Self::from_status(status::GONE, sub_status::NAME_CACHE_IS_STALE, message)
    }

    /// Partition key range is gone.
    pub fn partition_key_range_gone(message: impl Into<String>) -> Self {
        Self::from_status(status::GONE, sub_status::PARTITION_KEY_RANGE_GONE, message)
    }

    /// Read session not available.
    pub fn session_not_available(message: impl Into<String>) -> Self {
        Self::from_status(
            status::NOT_FOUND,
            sub_status::READ_SESSION_NOT_AVAILABLE,
            message,
        )
    }

    /// Resource or address not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_status(status::NOT_FOUND, sub_status::UNKNOWN, message)
    }

    /// Malformed input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from_status(status::BAD_REQUEST, sub_status::UNKNOWN, message)
    }

    /// Malformed input with a sub-status.
    pub fn bad_request_with(sub_status: u32, message: impl Into<String>) -> Self {
        Self::from_status(status::BAD_REQUEST, sub_status, message)
    }

    /// Protocol invariant violated.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::from_status(status::INTERNAL_SERVER_ERROR, sub_status::UNKNOWN, message)
    }

    /// Retried request resolved to an unrelated target.
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::from_status(
            status::INTERNAL_SERVER_ERROR,
            sub_status::TARGET_CHANGED,
            message,
        )
    }

    /// Deadline exceeded.
    pub fn request_timeout(message: impl Into<String>) -> Self {
        Self::from_status(status::REQUEST_TIMEOUT, sub_status::UNKNOWN, message)
    }

    /// Service unavailable.
    pub fn service_unavailable(sub_status: u32, message: impl Into<String>) -> Self {
        Self::from_status(status::SERVICE_UNAVAILABLE, sub_status, message)
    }

    /// Attach the error this one replaces.
    pub fn with_cause(mut self, cause: StoreError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach response headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach the originating replica.
    pub fn with_replica(mut self, uri: impl Into<String>) -> Self {
        self.replica_uri = Some(uri.into());
        self
    }

    /// Gone-class errors, including routing-stale 410 variants.
    pub fn is_gone_class(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Gone
                | ErrorKind::InvalidPartition
                | ErrorKind::PartitionKeyRangeGone
                | ErrorKind::PartitionKeyRangeIsSplitting
                | ErrorKind::PartitionIsMigrating
        )
    }

    /// Errors that some retry layer may absorb.
    pub fn is_retriable(&self) -> bool {
        self.is_gone_class()
            || matches!(
                self.kind,
                ErrorKind::RetryWith
                    | ErrorKind::SessionNotAvailable
                    | ErrorKind::WriteForbidden
                    | ErrorKind::CompletingPartitionMigration
                    | ErrorKind::TooManyRequests
                    | ErrorKind::ServiceUnavailable
            )
    }

    /// Protocol invariant violations that must never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InternalServerError | ErrorKind::InvalidTarget
        )
    }
}

/// Result type for consistency operations
pub type ConsistencyResult<T> = Result<T, StoreError>;

/// Failure reported by the transport for one replica call.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Replica no longer hosts the partition or is shutting down
    #[error("replica gone: {0}")]
    Gone(String),

    /// Replica did not answer in time
    #[error("transport timeout: {0}")]
    Timeout(String),

    /// Connection dropped mid-request
    #[error("connection broken: {0}")]
    ConnectionBroken(String),

    /// Replica answered with a failure status
    #[error("replica returned {status}/{sub_status}: {message}")]
    Server {
        status: u16,
        sub_status: u32,
        message: String,
        headers: Headers,
    },
}

impl From<TransportError> for StoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Gone(message) => StoreError::gone(message),
            TransportError::Timeout(message) => {
                StoreError::gone_with(sub_status::TRANSPORT_TIMEOUT, message)
            }
            TransportError::ConnectionBroken(message) => {
                StoreError::gone_with(sub_status::CONNECTION_BROKEN, message)
            }
            TransportError::Server {
                status,
                sub_status,
                message,
                headers,
            } => StoreError::from_status(status, sub_status, message).with_headers(headers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_classify_gone_variants() {
        assert_eq!(ErrorKind::classify(410, 0), ErrorKind::Gone);
        assert_eq!(ErrorKind::classify(410, 1000), ErrorKind::InvalidPartition);
        assert_eq!(ErrorKind::classify(410, 1002), ErrorKind::PartitionKeyRangeGone);
        assert_eq!(
            ErrorKind::classify(410, 1007),
            ErrorKind::PartitionKeyRangeIsSplitting
        );
        assert_eq!(ErrorKind::classify(410, 1008), ErrorKind::PartitionIsMigrating);
    }

    #[test]
    fn test_classify_session_not_available() {
        assert_eq!(ErrorKind::classify(404, 1002), ErrorKind::SessionNotAvailable);
        assert_eq!(ErrorKind::classify(404, 0), ErrorKind::NotFound);
    }

    #[test]
    fn test_client_generated_gone_stays_gone() {
        let err = StoreError::read_quorum_not_met("no quorum");
        assert_eq!(err.kind, ErrorKind::Gone);
        assert_eq!(err.sub_status, sub_status::READ_QUORUM_NOT_MET);
        assert!(err.is_gone_class());
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let gone = StoreError::gone("replica down");
        let err = StoreError::service_unavailable(sub_status::GONE_AFTER_RETRIES, "exhausted")
            .with_cause(gone);
        let source = err.source().expect("cause");
        assert!(source.to_string().contains("replica down"));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(StoreError::internal("bad").is_fatal());
        assert!(StoreError::invalid_target("moved").is_fatal());
        assert!(!StoreError::gone("x").is_fatal());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: StoreError = TransportError::Timeout("slow".into()).into();
        assert_eq!(err.kind, ErrorKind::Gone);
        assert_eq!(err.sub_status, sub_status::TRANSPORT_TIMEOUT);

        let err: StoreError = TransportError::Server {
            status: 449,
            sub_status: 0,
            message: "retry".into(),
            headers: Headers::new(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::RetryWith);
    }
}
