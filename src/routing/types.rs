//! Routing value types
//!
//! Collections, partition key ranges and backend identities are owned by
//! external caches. The core only reads them, so they are plain immutable
//! structs.

use serde::{Deserialize, Serialize};

/// Collection id used to address the master partition.
pub const MASTER_COLLECTION_ID: &str = "M";

/// Partition key range id of the master partition.
pub const MASTER_PARTITION_KEY_RANGE_ID: &str = "M";

/// Lowest effective partition key.
pub const MINIMUM_INCLUSIVE_EPK: &str = "";

/// Upper bound of the last range; treated as unbounded.
pub const MAXIMUM_EXCLUSIVE_EPK: &str = "FF";

/// Backend replica-set identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub federation_id: String,
    pub service_name: String,
    pub is_master_service: bool,
}

impl ServiceIdentity {
    pub fn new(
        federation_id: impl Into<String>,
        service_name: impl Into<String>,
        is_master_service: bool,
    ) -> Self {
        Self {
            federation_id: federation_id.into(),
            service_name: service_name.into(),
            is_master_service,
        }
    }
}

/// Identifies a partition key range, optionally qualified by collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeyRangeIdentity {
    pub collection_rid: Option<String>,
    pub partition_key_range_id: String,
}

impl PartitionKeyRangeIdentity {
    pub fn new(
        collection_rid: impl Into<String>,
        partition_key_range_id: impl Into<String>,
    ) -> Self {
        Self {
            collection_rid: Some(collection_rid.into()),
            partition_key_range_id: partition_key_range_id.into(),
        }
    }

    /// Range id without a collection qualifier (name-based callers).
    pub fn for_range(partition_key_range_id: impl Into<String>) -> Self {
        Self {
            collection_rid: None,
            partition_key_range_id: partition_key_range_id.into(),
        }
    }

    pub fn master() -> Self {
        Self::new(MASTER_COLLECTION_ID, MASTER_PARTITION_KEY_RANGE_ID)
    }
}

/// Contiguous slice `[min_inclusive, max_exclusive)` of the effective
/// partition key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    pub id: String,
    pub min_inclusive: String,
    pub max_exclusive: String,
    /// Ranges this one was split from, oldest first
    #[serde(default)]
    pub parents: Vec<String>,
}

impl PartitionKeyRange {
    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
            parents: Vec::new(),
        }
    }

    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn contains(&self, effective_partition_key: &str) -> bool {
        effective_partition_key >= self.min_inclusive.as_str()
            && (self.max_exclusive == MAXIMUM_EXCLUSIVE_EPK
                || effective_partition_key < self.max_exclusive.as_str())
    }

    /// Same range, or one split from `ancestor`.
    pub fn is_same_or_descendant_of(&self, ancestor: &PartitionKeyRange) -> bool {
        self.id == ancestor.id || self.parents.iter().any(|parent| *parent == ancestor.id)
    }
}

/// Collection metadata consumed by routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerProperties {
    pub id: String,
    /// Collection resource id
    pub resource_id: String,
    /// Partition key definition, e.g. `["/tenantId"]`
    #[serde(default)]
    pub partition_key_paths: Vec<String>,
}

impl ContainerProperties {
    pub fn new(id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_id: resource_id.into(),
            partition_key_paths: Vec::new(),
        }
    }

    pub fn with_partition_key_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_key_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_key_paths.is_empty()
    }
}

/// One physical replica endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInformation {
    pub uri: String,
    pub is_primary: bool,
    #[serde(default)]
    pub region: Option<String>,
}

impl AddressInformation {
    pub fn primary(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            is_primary: true,
            region: None,
        }
    }

    pub fn secondary(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            is_primary: false,
            region: None,
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Resolved physical replicas of one replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAddressInformation {
    pub service_identity: ServiceIdentity,
    pub addresses: Vec<AddressInformation>,
}

impl PartitionAddressInformation {
    pub fn new(service_identity: ServiceIdentity, addresses: Vec<AddressInformation>) -> Self {
        Self {
            service_identity,
            addresses,
        }
    }

    pub fn primary(&self) -> Option<&AddressInformation> {
        self.addresses.iter().find(|address| address.is_primary)
    }

    /// Candidate replicas, optionally without the primary.
    pub fn replicas(&self, include_primary: bool) -> Vec<&AddressInformation> {
        self.addresses
            .iter()
            .filter(|address| include_primary || !address.is_primary)
            .collect()
    }

    pub fn region_of(&self, uri: &str) -> Option<&str> {
        self.addresses
            .iter()
            .find(|address| address.uri == uri)
            .and_then(|address| address.region.as_deref())
    }
}
