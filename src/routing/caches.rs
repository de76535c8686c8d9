//! External routing caches
//!
//! Collection, routing-map and address caches and the master identity
//! provider are independently synchronized collaborators. The resolver
//! consults them and asks for refreshes; it never owns their state.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::ConsistencyResult;
use crate::store::ServiceRequest;

use super::routing_map::CollectionRoutingMap;
use super::types::{
    ContainerProperties, PartitionAddressInformation, PartitionKeyRangeIdentity, ServiceIdentity,
};

/// Resolves the collection a request targets, by name or by id.
pub trait CollectionCache: Send + Sync {
    fn resolve_collection<'a>(
        &'a self,
        request: &'a ServiceRequest,
        force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<ContainerProperties>>;
}

/// Routing maps keyed by collection resource id.
pub trait RoutingMapCache: Send + Sync {
    /// Current map, or `None` when the collection has none. Passing the
    /// previously returned map asks for a refresh if it changed since.
    fn lookup<'a>(
        &'a self,
        collection_rid: &'a str,
        previous: Option<&'a CollectionRoutingMap>,
    ) -> BoxFuture<'a, ConsistencyResult<Option<Arc<CollectionRoutingMap>>>>;
}

/// What to resolve replica addresses for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressTarget {
    /// A backend replica set, e.g. the master
    Service(ServiceIdentity),
    /// A collection partition
    Range(PartitionKeyRangeIdentity),
}

/// Physical replica addresses.
pub trait AddressCache: Send + Sync {
    fn try_get_addresses<'a>(
        &'a self,
        request: &'a ServiceRequest,
        target: &'a AddressTarget,
        force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<Option<PartitionAddressInformation>>>;
}

/// Current master partition identity.
pub trait MasterServiceIdentityProvider: Send + Sync {
    fn master_service_identity(&self) -> Option<ServiceIdentity>;

    /// Refresh if the current identity is still `previous`.
    fn refresh<'a>(
        &'a self,
        previous: Option<&'a ServiceIdentity>,
    ) -> BoxFuture<'a, ConsistencyResult<()>>;
}
