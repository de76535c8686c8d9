//! Partition and address routing
//!
//! Maps logical requests onto partition key ranges and physical replica
//! sets through externally owned caches.

mod caches;
mod partition_key;
mod resolver;
mod routing_map;
mod types;

pub use caches::{
    AddressCache, AddressTarget, CollectionCache, MasterServiceIdentityProvider, RoutingMapCache,
};
pub use partition_key::PartitionKey;
pub use resolver::AddressResolver;
pub use routing_map::CollectionRoutingMap;
pub use types::{
    AddressInformation, ContainerProperties, PartitionAddressInformation, PartitionKeyRange,
    PartitionKeyRangeIdentity, ServiceIdentity, MASTER_COLLECTION_ID,
    MASTER_PARTITION_KEY_RANGE_ID, MAXIMUM_EXCLUSIVE_EPK, MINIMUM_INCLUSIVE_EPK,
};
