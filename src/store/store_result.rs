//! Per-replica outcome
//!
//! A [`StoreResult`] is built once from a replica response or failure and is
//! read-only afterwards. It extracts the LSN bookkeeping the quorum and
//! barrier logic vote on. Invalid results keep their error and hand it back
//! from [`StoreResult::to_response`]; valid results never fail there unless
//! the replica itself answered with an error status.

use crate::error::{status, sub_status, ConsistencyResult, StoreError};
use crate::session::{SessionToken, SessionTokenHelper};

use super::headers::{header_names, Headers};
use super::response::StoreResponse;

/// One replica's answer, classified.
#[derive(Debug, Clone)]
pub struct StoreResult {
    outcome: Result<StoreResponse, StoreError>,
    pub lsn: i64,
    pub quorum_acked_lsn: i64,
    pub global_committed_lsn: i64,
    pub item_lsn: i64,
    pub current_replica_set_size: i64,
    pub current_write_quorum: i64,
    pub number_of_read_regions: i64,
    pub request_charge: f64,
    pub status: u16,
    pub sub_status: u32,
    pub is_valid: bool,
    pub is_gone_exception: bool,
    pub is_invalid_partition_exception: bool,
    pub replica_uri: Option<String>,
    pub session_token: Option<SessionToken>,
}

impl StoreResult {
    /// Classify a replica call outcome.
    ///
    /// With `requires_valid_lsn`, only results carrying a non-negative LSN
    /// (and, for failures, not a plain gone) count as valid votes.
    pub fn from_outcome(
        outcome: Result<StoreResponse, StoreError>,
        replica_uri: Option<String>,
        requires_valid_lsn: bool,
    ) -> Self {
        match outcome {
            Ok(response) => Self::from_response(response, replica_uri, requires_valid_lsn),
            Err(err) => Self::from_error(err, replica_uri, requires_valid_lsn),
        }
    }

    pub fn from_response(
        response: StoreResponse,
        replica_uri: Option<String>,
        requires_valid_lsn: bool,
    ) -> Self {
        let lsn = response.lsn();
        let headers = response.headers.clone();
        let status = response.status;
        let sub_status = response.sub_status();
        let is_valid = !requires_valid_lsn || lsn >= 0;
        Self::build(
            Ok(response),
            &headers,
            lsn,
            status,
            sub_status,
            is_valid,
            false,
            false,
            replica_uri,
        )
    }

    pub fn from_error(
        err: StoreError,
        replica_uri: Option<String>,
        requires_valid_lsn: bool,
    ) -> Self {
        let headers = err.headers.clone();
        let lsn = headers.get_i64(header_names::LSN).unwrap_or(-1);
        let status = err.status;
        let sub_status = err.sub_status;
        let is_gone = status == status::GONE;
        let is_invalid_partition = is_gone && sub_status == sub_status::NAME_CACHE_IS_STALE;
        let is_valid =
            !requires_valid_lsn || ((!is_gone || is_invalid_partition) && lsn >= 0);
        let err = match (&err.replica_uri, &replica_uri) {
            (None, Some(uri)) => err.with_replica(uri.clone()),
            _ => err,
        };
        Self::build(
            Err(err),
            &headers,
            lsn,
            status,
            sub_status,
            is_valid,
            is_gone,
            is_invalid_partition,
            replica_uri,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        outcome: Result<StoreResponse, StoreError>,
        headers: &Headers,
        lsn: i64,
        status: u16,
        sub_status: u32,
        is_valid: bool,
        is_gone_exception: bool,
        is_invalid_partition_exception: bool,
        replica_uri: Option<String>,
    ) -> Self {
        let read = |name: &str| headers.get_i64(name).unwrap_or(-1);
        // A malformed token on a response is ignored rather than failing the vote.
        let session_token = headers
            .get(header_names::SESSION_TOKEN)
            .and_then(|value| SessionTokenHelper::parse_response_token(value).ok());

        Self {
            outcome,
            lsn,
            quorum_acked_lsn: read(header_names::QUORUM_ACKED_LSN),
            global_committed_lsn: read(header_names::GLOBAL_COMMITTED_LSN),
            item_lsn: read(header_names::ITEM_LSN),
            current_replica_set_size: read(header_names::CURRENT_REPLICA_SET_SIZE),
            current_write_quorum: read(header_names::CURRENT_WRITE_QUORUM),
            number_of_read_regions: read(header_names::NUMBER_OF_READ_REGIONS),
            request_charge: headers.get_f64(header_names::REQUEST_CHARGE).unwrap_or(0.0),
            status,
            sub_status,
            is_valid,
            is_gone_exception,
            is_invalid_partition_exception,
            replica_uri,
            session_token,
        }
    }

    /// The replica's response, or the error it carried.
    pub fn to_response(&self) -> ConsistencyResult<StoreResponse> {
        match (&self.outcome, self.is_valid) {
            (Err(err), _) => Err(err.clone()),
            (Ok(response), true) => Ok(response.clone()),
            (Ok(_), false) => Err(StoreError::internal(format!(
                "replica {} returned an invalid lsn {}",
                self.replica_uri.as_deref().unwrap_or("<unknown>"),
                self.lsn
            ))),
        }
    }

    /// Error carried by the result, if the replica call failed.
    pub fn error(&self) -> Option<&StoreError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Whether a session token is at least as recent as `requested`.
    pub fn satisfies_session(&self, requested: Option<&SessionToken>) -> ConsistencyResult<bool> {
        match (requested, &self.session_token) {
            (None, _) => Ok(true),
            (Some(_), None) => Ok(false),
            (Some(requested), Some(actual)) => requested.is_valid(actual),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn lsn_headers(lsn: i64) -> Headers {
        Headers::new()
            .with(header_names::LSN, lsn)
            .with(header_names::QUORUM_ACKED_LSN, lsn)
            .with(header_names::GLOBAL_COMMITTED_LSN, lsn - 1)
            .with(header_names::NUMBER_OF_READ_REGIONS, 2)
    }

    #[test]
    fn test_response_headers_are_extracted() {
        let result = StoreResult::from_response(
            StoreResponse::new(200, lsn_headers(7)),
            Some("rntbd://r1".into()),
            true,
        );
        assert!(result.is_valid);
        assert_eq!(result.lsn, 7);
        assert_eq!(result.quorum_acked_lsn, 7);
        assert_eq!(result.global_committed_lsn, 6);
        assert_eq!(result.number_of_read_regions, 2);
        assert_eq!(result.item_lsn, -1);
        assert!(result.to_response().is_ok());
    }

    #[test]
    fn test_missing_lsn_invalid_only_when_required() {
        let response = StoreResponse::new(200, Headers::new());
        assert!(!StoreResult::from_response(response.clone(), None, true).is_valid);
        assert!(StoreResult::from_response(response, None, false).is_valid);
    }

    #[test]
    fn test_gone_is_never_a_valid_vote() {
        let err = StoreError::gone("replica moved").with_headers(lsn_headers(9));
        let result = StoreResult::from_error(err, Some("rntbd://r2".into()), true);
        assert!(!result.is_valid);
        assert!(result.is_gone_exception);

        let err = result.to_response().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Gone);
        assert_eq!(err.replica_uri.as_deref(), Some("rntbd://r2"));
    }

    #[test]
    fn test_not_found_with_lsn_is_a_valid_vote() {
        let err = StoreError::not_found("missing").with_headers(lsn_headers(4));
        let result = StoreResult::from_error(err, None, true);
        assert!(result.is_valid);
        assert_eq!(result.lsn, 4);
        assert_eq!(result.to_response().unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_partition_flagged() {
        let err = StoreError::invalid_partition("stale").with_headers(lsn_headers(3));
        let result = StoreResult::from_error(err, None, true);
        assert!(result.is_invalid_partition_exception);
        assert!(result.is_valid);
    }

    #[test]
    fn test_session_satisfaction() {
        let headers = lsn_headers(5).with(header_names::SESSION_TOKEN, "0:1#5#1=5");
        let result = StoreResult::from_response(StoreResponse::new(200, headers), None, true);

        let older = SessionToken::parse("1#4#1=4").unwrap();
        let newer = SessionToken::parse("1#6#1=6").unwrap();
        assert!(result.satisfies_session(None).unwrap());
        assert!(result.satisfies_session(Some(&older)).unwrap());
        assert!(!result.satisfies_session(Some(&newer)).unwrap());
    }
}
