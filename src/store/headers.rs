//! Request and response headers
//!
//! Header names are case-insensitive; keys are stored lowercased.

use std::collections::BTreeMap;

/// Header names consumed or produced by the consistency core.
pub mod header_names {
    pub const LSN: &str = "lsn";
    pub const QUORUM_ACKED_LSN: &str = "x-ms-quorum-acked-lsn";
    pub const GLOBAL_COMMITTED_LSN: &str = "x-ms-global-committed-lsn";
    pub const ITEM_LSN: &str = "x-ms-item-lsn";
    pub const CURRENT_REPLICA_SET_SIZE: &str = "x-ms-current-replica-set-size";
    pub const CURRENT_WRITE_QUORUM: &str = "x-ms-current-write-quorum";
    pub const NUMBER_OF_READ_REGIONS: &str = "x-ms-number-of-read-regions";
    pub const SESSION_TOKEN: &str = "x-ms-session-token";
    pub const SUB_STATUS: &str = "x-ms-substatus";
    pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
    pub const PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";
    pub const PARTITION_KEY_RANGE_ID: &str = "x-ms-documentdb-partitionkeyrangeid";
    pub const COLLECTION_RID: &str = "x-ms-documentdb-collection-rid";
    pub const CONSISTENCY_LEVEL: &str = "x-ms-consistency-level";
    pub const TARGET_LSN: &str = "x-ms-target-lsn";
    pub const TARGET_GLOBAL_COMMITTED_LSN: &str = "x-ms-target-global-committed-lsn";
    pub const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
    pub const ACTIVITY_ID: &str = "x-ms-activity-id";
}

/// Case-insensitive header map with deterministic iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.set(name, value.to_string());
        self
    }

    /// Integer header; absent or malformed values read as `None`.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
