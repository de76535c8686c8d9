//! Session tokens
//!
//! A session token is a vector clock over a partition's write history:
//!
//! ```text
//! <version>#<globalLsn>(#<regionId>=<localLsn>)*
//! ```
//!
//! `version` is the replica-set configuration generation. Tokens at equal
//! version always describe the same region set; a mismatch is a protocol
//! invariant violation and fails loudly instead of dropping regions.
//!
//! The legacy form is a bare integer LSN.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{sub_status, ConsistencyResult, StoreError};
use crate::observability::{log_event_with_fields, Event};

/// Region identifier inside a vector token
pub type RegionId = u32;

const SEGMENT_SEPARATOR: char = '#';
const REGION_SEPARATOR: char = '=';

/// Vector session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VectorSessionToken {
    version: i64,
    global_lsn: i64,
    local_lsn_by_region: BTreeMap<RegionId, i64>,
}

impl VectorSessionToken {
    pub fn new(
        version: i64,
        global_lsn: i64,
        local_lsn_by_region: BTreeMap<RegionId, i64>,
    ) -> Self {
        Self {
            version,
            global_lsn,
            local_lsn_by_region,
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn global_lsn(&self) -> i64 {
        self.global_lsn
    }

    pub fn local_lsn_by_region(&self) -> &BTreeMap<RegionId, i64> {
        &self.local_lsn_by_region
    }

    fn parse(token: &str) -> Option<Self> {
        let mut segments = token.split(SEGMENT_SEPARATOR);
        let version = segments.next()?.parse::<i64>().ok()?;
        let global_lsn = segments.next()?.parse::<i64>().ok()?;

        let mut local_lsn_by_region = BTreeMap::new();
        for segment in segments {
            let (region, lsn) = segment.split_once(REGION_SEPARATOR)?;
            let region = region.parse::<RegionId>().ok()?;
            let lsn = lsn.parse::<i64>().ok()?;
            if local_lsn_by_region.insert(region, lsn).is_some() {
                return None;
            }
        }

        Some(Self::new(version, global_lsn, local_lsn_by_region))
    }

    fn region_sets_match(&self, other: &Self) -> bool {
        self.local_lsn_by_region.len() == other.local_lsn_by_region.len()
            && self
                .local_lsn_by_region
                .keys()
                .all(|region| other.local_lsn_by_region.contains_key(region))
    }

    fn region_mismatch(&self, other: &Self) -> StoreError {
        let a = self.to_string();
        let b = other.to_string();
        log_event_with_fields(
            Event::SessionTokenInvariantViolated,
            &[("left", a.as_str()), ("right", b.as_str())],
        );
        StoreError::internal(format!(
            "session tokens '{}' and '{}' have the same version but different regions",
            a, b
        ))
    }

    /// Whether `other` has observed at least everything `self` describes.
    pub fn is_valid(&self, other: &Self) -> ConsistencyResult<bool> {
        if other.version < self.version || other.global_lsn < self.global_lsn {
            return Ok(false);
        }

        if other.version == self.version && !self.region_sets_match(other) {
            return Err(self.region_mismatch(other));
        }

        for (region, other_lsn) in &other.local_lsn_by_region {
            match self.local_lsn_by_region.get(region) {
                Some(self_lsn) if other_lsn < self_lsn => return Ok(false),
                Some(_) => {}
                // New region in a later topology generation
                None => {}
            }
        }

        Ok(true)
    }

    /// Pointwise maximum. The region set follows the higher version.
    pub fn merge(&self, other: &Self) -> ConsistencyResult<Self> {
        if self.version == other.version && !self.region_sets_match(other) {
            return Err(self.region_mismatch(other));
        }

        let (higher, lower) = if self.version >= other.version {
            (self, other)
        } else {
            (other, self)
        };

        let local_lsn_by_region = higher
            .local_lsn_by_region
            .iter()
            .map(|(region, lsn)| {
                let merged = match lower.local_lsn_by_region.get(region) {
                    Some(lower_lsn) => (*lsn).max(*lower_lsn),
                    None => *lsn,
                };
                (*region, merged)
            })
            .collect();

        Ok(Self::new(
            higher.version,
            self.global_lsn.max(other.global_lsn),
            local_lsn_by_region,
        ))
    }
}

impl fmt::Display for VectorSessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.version, SEGMENT_SEPARATOR, self.global_lsn)?;
        for (region, lsn) in &self.local_lsn_by_region {
            write!(f, "{}{}{}{}", SEGMENT_SEPARATOR, region, REGION_SEPARATOR, lsn)?;
        }
        Ok(())
    }
}

/// Session token, vector or legacy single-LSN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionToken {
    /// Bare LSN, negotiated with legacy replicas
    Simple(i64),
    /// Per-region vector clock
    Vector(VectorSessionToken),
}

impl SessionToken {
    /// Parse either wire form. Malformed input is BadRequest.
    pub fn parse(token: &str) -> ConsistencyResult<Self> {
        let token = token.trim();
        if let Some(vector) = VectorSessionToken::parse(token) {
            return Ok(Self::Vector(vector));
        }
        if !token.contains(SEGMENT_SEPARATOR) {
            if let Ok(lsn) = token.parse::<i64>() {
                return Ok(Self::Simple(lsn));
            }
        }
        Err(StoreError::bad_request_with(
            sub_status::MALFORMED_SESSION_TOKEN,
            format!("malformed session token '{}'", token),
        ))
    }

    /// Global LSN of the token.
    pub fn lsn(&self) -> i64 {
        match self {
            Self::Simple(lsn) => *lsn,
            Self::Vector(v) => v.global_lsn,
        }
    }

    /// Wire representation.
    pub fn convert_to_string(&self) -> String {
        self.to_string()
    }

    /// Whether `other` (typically a replica's token) dominates `self`.
    pub fn is_valid(&self, other: &SessionToken) -> ConsistencyResult<bool> {
        match (self, other) {
            (Self::Simple(a), Self::Simple(b)) => Ok(b >= a),
            (Self::Vector(a), Self::Vector(b)) => a.is_valid(b),
            _ => Err(Self::format_mismatch(self, other)),
        }
    }

    /// Join of two tokens.
    pub fn merge(&self, other: &SessionToken) -> ConsistencyResult<SessionToken> {
        match (self, other) {
            (Self::Simple(a), Self::Simple(b)) => Ok(Self::Simple(*a.max(b))),
            (Self::Vector(a), Self::Vector(b)) => Ok(Self::Vector(a.merge(b)?)),
            _ => Err(Self::format_mismatch(self, other)),
        }
    }

    fn format_mismatch(a: &SessionToken, b: &SessionToken) -> StoreError {
        StoreError::internal(format!(
            "cannot combine simple and vector session tokens '{}' and '{}'",
            a, b
        ))
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(lsn) => write!(f, "{}", lsn),
            Self::Vector(v) => write!(f, "{}", v),
        }
    }
}

impl FromStr for SessionToken {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
