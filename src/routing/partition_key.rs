//! Partition key values and effective partition key hashing
//!
//! The partition key travels as a JSON array header, one element per path of
//! the collection's partition key definition. The effective partition key
//! (EPK) is the uppercase hex of the first 8 bytes of the SHA-256 of the
//! canonical JSON form of the components; the empty key maps to the minimum
//! EPK.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ConsistencyResult, StoreError};

use super::types::MINIMUM_INCLUSIVE_EPK;

const EPK_HASH_BYTES: usize = 8;

/// Parsed partition key.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionKey {
    components: Vec<Value>,
}

impl PartitionKey {
    pub fn new(components: Vec<Value>) -> Self {
        Self { components }
    }

    /// Parse the JSON wire form, e.g. `["tenant-1", 42]`.
    pub fn from_json(json: &str) -> ConsistencyResult<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| {
            StoreError::bad_request(format!("malformed partition key '{}': {}", json, e))
        })?;

        match value {
            Value::Array(components) => {
                if let Some(bad) = components
                    .iter()
                    .find(|c| matches!(c, Value::Array(_) | Value::Object(_)))
                {
                    return Err(StoreError::bad_request(format!(
                        "partition key component {} is not a primitive value",
                        bad
                    )));
                }
                Ok(Self { components })
            }
            other => Err(StoreError::bad_request(format!(
                "partition key must be a JSON array, got {}",
                other
            ))),
        }
    }

    pub fn components(&self) -> &[Value] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn to_json(&self) -> String {
        Value::Array(self.components.clone()).to_string()
    }

    pub fn effective_partition_key(&self) -> String {
        if self.components.is_empty() {
            return MINIMUM_INCLUSIVE_EPK.to_string();
        }

        let digest = Sha256::digest(self.to_json().as_bytes());
        digest[..EPK_HASH_BYTES]
            .iter()
            .map(|byte| format!("{:02X}", byte))
            .collect()
    }
}
