//! Logical request against a named resource
//!
//! A [`ServiceRequest`] is owned by one logical operation for its whole
//! lifetime, across retries. Routing hints (`force_*`) are flipped by the
//! retry policies and consumed by the address resolver.

use std::str::FromStr;

use uuid::Uuid;

use crate::config::ConsistencyLevel;
use crate::error::{ConsistencyResult, StoreError};
use crate::routing::{PartitionKeyRangeIdentity, ServiceIdentity};

use super::context::RequestContext;
use super::headers::{header_names, Headers};

/// Operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Create,
    Read,
    Replace,
    Upsert,
    Delete,
    Patch,
    ReadFeed,
    Query,
    /// Lightweight read used as a barrier
    Head,
    /// Feed-level barrier
    HeadFeed,
}

impl OperationType {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Replace | Self::Upsert | Self::Delete | Self::Patch
        )
    }

    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self, Self::Head | Self::HeadFeed)
    }
}

/// Resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    DatabaseAccount,
    Database,
    Collection,
    Document,
    Attachment,
    Conflict,
    StoredProcedure,
    Trigger,
    UserDefinedFunction,
    PartitionKeyRange,
    User,
    Permission,
    Offer,
}

impl ResourceType {
    /// Resources spread across partitions by partition key.
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Self::Document | Self::Attachment | Self::Conflict)
    }

    /// Resources stored on the master partition.
    pub fn is_master(&self) -> bool {
        matches!(
            self,
            Self::DatabaseAccount
                | Self::Database
                | Self::Collection
                | Self::User
                | Self::Permission
                | Self::Offer
        )
    }
}

/// Logical request
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// Activity id for diagnostics
    pub activity_id: Uuid,
    pub operation_type: OperationType,
    pub resource_type: ResourceType,
    /// Name-based (`dbs/db/colls/c/docs/d`) or id-based address
    pub resource_address: String,
    pub is_name_based: bool,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    /// Explicit backend identity; bypasses collection routing
    pub service_identity: Option<ServiceIdentity>,
    /// Explicit partition key range
    pub partition_key_range_identity: Option<PartitionKeyRangeIdentity>,
    /// Pins the read to one replica (0 is the primary)
    pub default_replica_index: Option<usize>,
    pub force_name_cache_refresh: bool,
    pub force_partition_key_range_refresh: bool,
    pub force_collection_routing_map_refresh: bool,
    pub force_master_refresh: bool,
    pub context: RequestContext,
}

impl ServiceRequest {
    pub fn new(
        operation_type: OperationType,
        resource_type: ResourceType,
        resource_address: impl Into<String>,
    ) -> Self {
        let activity_id = Uuid::new_v4();
        let headers = Headers::new().with(header_names::ACTIVITY_ID, activity_id);
        Self {
            activity_id,
            operation_type,
            resource_type,
            resource_address: resource_address.into(),
            is_name_based: true,
            headers,
            body: None,
            service_identity: None,
            partition_key_range_identity: None,
            default_replica_index: None,
            force_name_cache_refresh: false,
            force_partition_key_range_refresh: false,
            force_collection_routing_map_refresh: false,
            force_master_refresh: false,
            context: RequestContext::default(),
        }
    }

    /// Partition key as its JSON wire form, e.g. `["tenant-1"]`.
    pub fn with_partition_key(mut self, partition_key_json: impl Into<String>) -> Self {
        self.headers
            .set(header_names::PARTITION_KEY, partition_key_json.into());
        self
    }

    pub fn with_partition_key_range(mut self, identity: PartitionKeyRangeIdentity) -> Self {
        self.partition_key_range_identity = Some(identity);
        self
    }

    pub fn with_service_identity(mut self, identity: ServiceIdentity) -> Self {
        self.service_identity = Some(identity);
        self
    }

    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.headers.set(header_names::CONSISTENCY_LEVEL, level.as_str());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.headers.set(header_names::SESSION_TOKEN, token.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Id-based addressing; the collection cache is authoritative for it.
    pub fn id_based(mut self) -> Self {
        self.is_name_based = false;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.operation_type.is_read_only()
    }

    /// Whether this request is served by the master partition.
    pub fn is_reading_from_master(&self) -> bool {
        self.resource_type.is_master()
            || (self.resource_type == ResourceType::PartitionKeyRange
                && self.operation_type == OperationType::ReadFeed)
    }

    /// Consistency override carried by the request, if any.
    pub fn requested_consistency_level(&self) -> ConsistencyResult<Option<ConsistencyLevel>> {
        match self.headers.get(header_names::CONSISTENCY_LEVEL) {
            Some(value) => ConsistencyLevel::from_str(value)
                .map(Some)
                .map_err(StoreError::bad_request),
            None => Ok(None),
        }
    }
}
