//! Partition-scoped session token handling
//!
//! The session header a caller sends spans every partition it has touched:
//!
//! ```text
//! <partitionId>:<token>(,<partitionId>:<token>)*
//! ```
//!
//! Only the segment for the target partition, merged with its parents'
//! segments right after a split, is sent to a replica.

use crate::error::{sub_status, ConsistencyResult, ErrorKind, StoreError};
use crate::routing::PartitionKeyRange;
use crate::store::{header_names, ServiceRequest};

use super::token::SessionToken;

const PARTITION_SEPARATOR: char = ':';
const TOKEN_SEPARATOR: char = ',';

/// Session token helpers.
pub struct SessionTokenHelper;

impl SessionTokenHelper {
    /// Split a global session header into `(partition id, token)` pairs.
    ///
    /// A segment without a partition prefix is a legacy token and has an
    /// empty partition id.
    pub fn parse_segments(global: &str) -> ConsistencyResult<Vec<(String, SessionToken)>> {
        global
            .split(TOKEN_SEPARATOR)
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once(PARTITION_SEPARATOR) {
                Some((partition, token)) => {
                    if partition.is_empty() {
                        return Err(StoreError::bad_request_with(
                            sub_status::MALFORMED_SESSION_TOKEN,
                            format!("session token segment '{}' has no partition id", segment),
                        ));
                    }
                    Ok((partition.to_string(), SessionToken::parse(token)?))
                }
                None => Ok((String::new(), SessionToken::parse(segment)?)),
            })
            .collect()
    }

    /// Partition-scoped wire form `<partitionId>:<token>`.
    pub fn serialize(partition_key_range_id: &str, token: &SessionToken) -> String {
        format!("{}{}{}", partition_key_range_id, PARTITION_SEPARATOR, token)
    }

    /// Resolve the token that applies to one partition.
    ///
    /// The partition's own segment is merged with the segments of its
    /// parents (it was split from them). When the two cannot be merged
    /// because they share a version but not a region set, the own segment
    /// is used alone. Segments for unrelated partitions are ignored.
    pub fn get_local_session_token(
        global: &str,
        partition_key_range_id: &str,
        parents: &[String],
    ) -> ConsistencyResult<Option<SessionToken>> {
        let segments = Self::parse_segments(global)?;

        let mut own: Option<SessionToken> = None;
        let mut inherited: Option<SessionToken> = None;
        for (partition, token) in segments {
            if partition == partition_key_range_id || partition.is_empty() {
                own = Some(match own {
                    Some(current) => current.merge(&token)?,
                    None => token,
                });
            } else if parents.iter().any(|parent| *parent == partition) {
                inherited = Some(match inherited {
                    Some(current) => current.merge(&token)?,
                    None => token,
                });
            }
        }

        match (own, inherited) {
            (Some(own), Some(inherited)) => match own.merge(&inherited) {
                Ok(merged) => Ok(Some(merged)),
                // The merge already logged the invariant violation.
                Err(err) if err.kind == ErrorKind::InternalServerError => Ok(Some(own)),
                Err(err) => Err(err),
            },
            (own, inherited) => Ok(own.or(inherited)),
        }
    }

    /// Local token for a request targeting `range`, from its session header.
    pub fn resolve_for_range(
        request: &ServiceRequest,
        range: &PartitionKeyRange,
    ) -> ConsistencyResult<Option<SessionToken>> {
        match request.headers.get(header_names::SESSION_TOKEN) {
            Some(global) if !global.is_empty() => {
                Self::get_local_session_token(global, &range.id, &range.parents)
            }
            _ => Ok(None),
        }
    }

    /// Replace the request's session header with the partition-local token.
    ///
    /// Returns the caller's original header so it can be restored after the
    /// replica call. Without a resolved range the header is left untouched.
    pub fn set_partition_local_session_token(
        request: &mut ServiceRequest,
    ) -> ConsistencyResult<Option<String>> {
        let original = request.headers.get(header_names::SESSION_TOKEN).map(str::to_string);
        let range = match request.context.resolved_partition_key_range.clone() {
            Some(range) => range,
            None => return Ok(original),
        };

        let local = Self::resolve_for_range(request, &range)?;
        match &local {
            Some(token) => request
                .headers
                .set(header_names::SESSION_TOKEN, Self::serialize(&range.id, token)),
            None => {
                request.headers.remove(header_names::SESSION_TOKEN);
            }
        }
        request.context.session_token = local;
        Ok(original)
    }

    /// Put the caller's original session header back.
    pub fn restore_session_token(request: &mut ServiceRequest, original: Option<String>) {
        match original {
            Some(value) => request.headers.set(header_names::SESSION_TOKEN, value),
            None => {
                request.headers.remove(header_names::SESSION_TOKEN);
            }
        }
    }

    /// Token carried by a response header, with or without a partition prefix.
    pub fn parse_response_token(value: &str) -> ConsistencyResult<SessionToken> {
        match value.split_once(PARTITION_SEPARATOR) {
            Some((_, token)) => SessionToken::parse(token),
            None => SessionToken::parse(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_segment_merged_with_parent() {
        let token = SessionTokenHelper::get_local_session_token(
            "0:1#200#0=50,1:1#100#0=20",
            "1",
            &["0".to_string()],
        )
        .unwrap()
        .unwrap();
        assert_eq!(token, SessionToken::parse("1#200#0=50").unwrap());
    }

    #[test]
    fn test_own_segment_kept_when_parent_regions_differ() {
        let token = SessionTokenHelper::get_local_session_token(
            "0:1#100#0=20#1=30,1:1#100#0=20",
            "1",
            &["0".to_string()],
        )
        .unwrap()
        .unwrap();
        assert_eq!(token, SessionToken::parse("1#100#0=20").unwrap());
    }

    #[test]
    fn test_parent_segments_used_after_split() {
        let token = SessionTokenHelper::get_local_session_token(
            "0:1#100#0=20,2:1#500#0=90",
            "3",
            &["0".to_string()],
        )
        .unwrap()
        .unwrap();
        assert_eq!(token, SessionToken::parse("1#100#0=20").unwrap());
    }

    #[test]
    fn test_multiple_parents_are_merged() {
        let token = SessionTokenHelper::get_local_session_token(
            "0:1#100#0=20,1:1#150#0=10",
            "5",
            &["0".to_string(), "1".to_string()],
        )
        .unwrap()
        .unwrap();
        assert_eq!(token, SessionToken::parse("1#150#0=20").unwrap());
    }

    #[test]
    fn test_unrelated_partitions_ignored() {
        let token =
            SessionTokenHelper::get_local_session_token("7:1#100#0=20", "1", &["0".to_string()])
                .unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn test_legacy_segment_applies_to_any_partition() {
        let token = SessionTokenHelper::get_local_session_token("42", "9", &[])
            .unwrap()
            .unwrap();
        assert_eq!(token, SessionToken::Simple(42));
    }

    #[test]
    fn test_malformed_segment_is_bad_request() {
        let err = SessionTokenHelper::get_local_session_token(":1#5", "0", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        let err = SessionTokenHelper::get_local_session_token("0:abc", "0", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn test_serialize() {
        let token = SessionToken::parse("1#5#0=3").unwrap();
        assert_eq!(SessionTokenHelper::serialize("4", &token), "4:1#5#0=3");
        assert_eq!(
            SessionTokenHelper::parse_response_token("4:1#5#0=3").unwrap(),
            token
        );
    }
}
