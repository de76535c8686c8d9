//! Address Resolution
//!
//! Maps a logical request to the physical replica set that serves it:
//!
//! 1. An explicit service identity is resolved directly.
//! 2. Master resources go to the master identity, refreshed on demand and
//!    retried once when its addresses are missing.
//! 3. Anything else resolves the owning collection, then its routing map,
//!    reconciling a stale collection cache or routing map by refreshing each
//!    at most once.
//! 4. The target range comes from an explicit range id, the partition key
//!    header, or the sole range of a single-range collection.
//! 5. Replica addresses are fetched for `(collection, range)`.
//!
//! A retried request must land on the range it first resolved to, or on a
//! range split from it. Anything else fails with `InvalidTarget`.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::{sub_status, ConsistencyResult, StoreError};
use crate::observability::{log_event_with_fields, Event};
use crate::store::{header_names, AddressResolution, ServiceRequest};

use super::caches::{
    AddressCache, AddressTarget, CollectionCache, MasterServiceIdentityProvider, RoutingMapCache,
};
use super::partition_key::PartitionKey;
use super::routing_map::CollectionRoutingMap;
use super::types::{
    ContainerProperties, PartitionAddressInformation, PartitionKeyRange,
    PartitionKeyRangeIdentity, ServiceIdentity, MINIMUM_INCLUSIVE_EPK,
};

/// Outcome of one resolution pass.
struct ResolutionResult {
    addresses: PartitionAddressInformation,
    target_range: Option<PartitionKeyRange>,
    collection_rid: Option<String>,
}

/// Resolves requests to replica addresses through the external caches.
pub struct AddressResolver {
    collection_cache: Arc<dyn CollectionCache>,
    routing_map_cache: Arc<dyn RoutingMapCache>,
    address_cache: Arc<dyn AddressCache>,
    master_identity_provider: Option<Arc<dyn MasterServiceIdentityProvider>>,
}

impl AddressResolver {
    pub fn new(
        collection_cache: Arc<dyn CollectionCache>,
        routing_map_cache: Arc<dyn RoutingMapCache>,
        address_cache: Arc<dyn AddressCache>,
    ) -> Self {
        Self {
            collection_cache,
            routing_map_cache,
            address_cache,
            master_identity_provider: None,
        }
    }

    pub fn with_master_identity_provider(
        mut self,
        provider: Arc<dyn MasterServiceIdentityProvider>,
    ) -> Self {
        self.master_identity_provider = Some(provider);
        self
    }

    /// Resolve the request to its replica addresses and backend identity.
    ///
    /// Records the routing decision on the request context.
    pub async fn resolve(
        &self,
        request: &mut ServiceRequest,
        force_refresh_partition_addresses: bool,
    ) -> ConsistencyResult<(PartitionAddressInformation, ServiceIdentity)> {
        request.context.diagnostics.record_address_resolution();

        let result = self
            .resolve_addresses_and_identity(request, force_refresh_partition_addresses)
            .await?;

        Self::throw_if_target_changed(
            request,
            result.target_range.as_ref(),
            result.collection_rid.as_deref(),
        )?;

        let identity = result.addresses.service_identity.clone();
        request.context.target_identity = Some(identity.clone());
        request.context.resolved_partition_key_range = result.target_range;
        if result.collection_rid.is_some() {
            request.context.resolved_collection_rid = result.collection_rid;
        }

        Ok((result.addresses, identity))
    }

    /// Whether a retried resolution stays within the initially resolved
    /// partition lineage of the same collection.
    pub fn is_same_collection(
        initial_collection_rid: Option<&str>,
        initial: &PartitionKeyRange,
        retried_collection_rid: Option<&str>,
        retried: &PartitionKeyRange,
    ) -> bool {
        let same_collection = match (initial_collection_rid, retried_collection_rid) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        same_collection && retried.is_same_or_descendant_of(initial)
    }

    fn throw_if_target_changed(
        request: &ServiceRequest,
        new_range: Option<&PartitionKeyRange>,
        new_collection_rid: Option<&str>,
    ) -> ConsistencyResult<()> {
        let (previous, retried) = match (&request.context.resolved_partition_key_range, new_range)
        {
            (Some(previous), Some(retried)) => (previous, retried),
            _ => return Ok(()),
        };

        let previous_rid = request.context.resolved_collection_rid.as_deref();
        if Self::is_same_collection(previous_rid, previous, new_collection_rid, retried) {
            return Ok(());
        }

        log_event_with_fields(
            Event::TargetPartitionChanged,
            &[
                ("activity_id", request.activity_id.to_string().as_str()),
                ("previous_range", previous.id.as_str()),
                ("previous_collection", previous_rid.unwrap_or("")),
                ("new_range", retried.id.as_str()),
                ("new_collection", new_collection_rid.unwrap_or("")),
            ],
        );
        Err(StoreError::invalid_target(format!(
            "request {} first resolved to range {} but now resolves to range {}",
            request.resource_address, previous.id, retried.id
        )))
    }

    async fn resolve_addresses_and_identity(
        &self,
        request: &mut ServiceRequest,
        force_refresh: bool,
    ) -> ConsistencyResult<ResolutionResult> {
        if let Some(identity) = request.service_identity.clone() {
            return self
                .resolve_explicit_identity(request, identity, force_refresh)
                .await;
        }

        if request.is_reading_from_master() && request.partition_key_range_identity.is_none() {
            return self.resolve_master(request, force_refresh).await;
        }

        self.resolve_collection_partition(request, force_refresh).await
    }

    async fn resolve_explicit_identity(
        &self,
        request: &mut ServiceRequest,
        mut identity: ServiceIdentity,
        force_refresh: bool,
    ) -> ConsistencyResult<ResolutionResult> {
        if identity.is_master_service && request.force_master_refresh {
            if let Some(provider) = &self.master_identity_provider {
                provider.refresh(Some(&identity)).await?;
                if let Some(refreshed) = provider.master_service_identity() {
                    if refreshed != identity {
                        log_event_with_fields(
                            Event::MasterIdentityRefreshed,
                            &[
                                ("previous", identity.service_name.as_str()),
                                ("current", refreshed.service_name.as_str()),
                            ],
                        );
                        request.service_identity = Some(refreshed.clone());
                        identity = refreshed;
                    }
                }
            }
            request.force_master_refresh = false;
        }

        let target = AddressTarget::Service(identity.clone());
        let addresses = self
            .address_cache
            .try_get_addresses(request, &target, force_refresh)
            .await?
            .ok_or_else(|| {
                StoreError::not_found(format!(
                    "no addresses for service {}",
                    identity.service_name
                ))
            })?;

        Ok(ResolutionResult {
            addresses,
            target_range: None,
            collection_rid: None,
        })
    }

    async fn resolve_master(
        &self,
        request: &mut ServiceRequest,
        force_refresh: bool,
    ) -> ConsistencyResult<ResolutionResult> {
        let provider = self.master_identity_provider.clone();
        let mut identity = provider.as_ref().and_then(|p| p.master_service_identity());

        if request.force_master_refresh {
            if let (Some(p), Some(current)) = (provider.as_ref(), identity.clone()) {
                p.refresh(Some(&current)).await?;
                identity = p.master_service_identity();
                log_event_with_fields(
                    Event::MasterIdentityRefreshed,
                    &[("previous", current.service_name.as_str())],
                );
            }
            request.force_master_refresh = false;
        }

        let target = match &identity {
            Some(identity) => AddressTarget::Service(identity.clone()),
            None => AddressTarget::Range(PartitionKeyRangeIdentity::master()),
        };
        let mut addresses = self
            .address_cache
            .try_get_addresses(request, &target, force_refresh)
            .await?;

        // Master moved under us: refresh the identity and try once more.
        if addresses.is_none() {
            if let (Some(p), Some(current)) = (provider.as_ref(), identity.clone()) {
                p.refresh(Some(&current)).await?;
                if let Some(refreshed) = p.master_service_identity() {
                    let target = AddressTarget::Service(refreshed);
                    addresses = self
                        .address_cache
                        .try_get_addresses(request, &target, true)
                        .await?;
                }
            }
        }

        let addresses = addresses
            .ok_or_else(|| StoreError::not_found("no addresses for the master partition"))?;
        Ok(ResolutionResult {
            addresses,
            target_range: None,
            collection_rid: None,
        })
    }

    async fn resolve_collection(
        &self,
        request: &mut ServiceRequest,
    ) -> ConsistencyResult<ContainerProperties> {
        let force = request.force_name_cache_refresh;
        let collection = self.collection_cache.resolve_collection(request, force).await?;
        request.force_name_cache_refresh = false;
        Ok(collection)
    }

    async fn lookup_routing_map(
        &self,
        collection_rid: &str,
        previous: Option<&CollectionRoutingMap>,
    ) -> ConsistencyResult<Option<Arc<CollectionRoutingMap>>> {
        let map = self.routing_map_cache.lookup(collection_rid, previous).await?;
        if previous.is_some() {
            log_event_with_fields(
                Event::RoutingCacheRefreshed,
                &[
                    ("collection", collection_rid),
                    ("found", if map.is_some() { "true" } else { "false" }),
                ],
            );
        }
        Ok(map)
    }

    fn ensure_routing_map_present(
        routing_map: Option<Arc<CollectionRoutingMap>>,
        collection: &ContainerProperties,
    ) -> ConsistencyResult<Arc<CollectionRoutingMap>> {
        routing_map.ok_or_else(|| {
            StoreError::invalid_partition(format!(
                "routing map for collection {} ({}) not found",
                collection.id, collection.resource_id
            ))
        })
    }

    async fn resolve_collection_partition(
        &self,
        request: &mut ServiceRequest,
        force_refresh: bool,
    ) -> ConsistencyResult<ResolutionResult> {
        let mut collection_cache_is_up_to_date = !request.is_name_based
            || request
                .partition_key_range_identity
                .as_ref()
                .map_or(false, |identity| identity.collection_rid.is_some());
        let mut routing_map_cache_is_up_to_date = false;

        let mut collection = self.resolve_collection(request).await?;
        let mut routing_map = self.lookup_routing_map(&collection.resource_id, None).await?;

        if request.force_collection_routing_map_refresh {
            if let Some(previous) = routing_map.clone() {
                routing_map = self
                    .lookup_routing_map(&collection.resource_id, Some(&previous))
                    .await?;
            }
            request.force_collection_routing_map_refresh = false;
        }

        if request.force_partition_key_range_refresh {
            routing_map_cache_is_up_to_date = true;
            request.force_partition_key_range_refresh = false;
            if let Some(previous) = routing_map.clone() {
                routing_map = self
                    .lookup_routing_map(&collection.resource_id, Some(&previous))
                    .await?;
            }
        }

        if routing_map.is_none() && !collection_cache_is_up_to_date {
            request.force_name_cache_refresh = true;
            collection_cache_is_up_to_date = true;
            routing_map_cache_is_up_to_date = false;
            collection = self.resolve_collection(request).await?;
            routing_map = self.lookup_routing_map(&collection.resource_id, None).await?;
        }

        let mut routing_map = Self::ensure_routing_map_present(routing_map, &collection)?;

        let mut result = self
            .try_resolve_server_partition(
                request,
                &collection,
                &routing_map,
                collection_cache_is_up_to_date,
                routing_map_cache_is_up_to_date,
                force_refresh,
            )
            .await?;

        if result.is_none() {
            if !collection_cache_is_up_to_date {
                request.force_name_cache_refresh = true;
                collection = self.resolve_collection(request).await?;
                if collection.resource_id != routing_map.collection_rid() {
                    routing_map_cache_is_up_to_date = false;
                    let fresh = self.lookup_routing_map(&collection.resource_id, None).await?;
                    routing_map = Self::ensure_routing_map_present(fresh, &collection)?;
                }
            }

            if !routing_map_cache_is_up_to_date {
                let fresh = self
                    .lookup_routing_map(&collection.resource_id, Some(&routing_map))
                    .await?;
                routing_map = Self::ensure_routing_map_present(fresh, &collection)?;
            }

            result = self
                .try_resolve_server_partition(
                    request,
                    &collection,
                    &routing_map,
                    true,
                    true,
                    force_refresh,
                )
                .await?;
        }

        let (range, addresses) = result.ok_or_else(|| {
            StoreError::not_found(format!(
                "no partition addresses for {} in collection {}",
                request.resource_address, collection.resource_id
            ))
        })?;

        if request.is_name_based {
            request
                .headers
                .set(header_names::COLLECTION_RID, collection.resource_id.clone());
        }

        Ok(ResolutionResult {
            addresses,
            target_range: Some(range),
            collection_rid: Some(collection.resource_id),
        })
    }

    /// Pick the target range and fetch its addresses.
    ///
    /// `Ok(None)` means the caches may be stale and the caller should refresh
    /// them and try again.
    pub async fn try_resolve_server_partition(
        &self,
        request: &ServiceRequest,
        collection: &ContainerProperties,
        routing_map: &CollectionRoutingMap,
        collection_cache_is_up_to_date: bool,
        routing_map_cache_is_up_to_date: bool,
        force_refresh: bool,
    ) -> ConsistencyResult<Option<(PartitionKeyRange, PartitionAddressInformation)>> {
        let range = if let Some(identity) = &request.partition_key_range_identity {
            match routing_map.range_by_id(&identity.partition_key_range_id) {
                Some(range) => range.clone(),
                None if collection_cache_is_up_to_date && routing_map_cache_is_up_to_date => {
                    return Err(StoreError::partition_key_range_gone(format!(
                        "partition key range {} of collection {} is gone",
                        identity.partition_key_range_id, collection.resource_id
                    )));
                }
                None => return Ok(None),
            }
        } else if !request.resource_type.is_partitioned() {
            match routing_map.range_by_effective_partition_key(MINIMUM_INCLUSIVE_EPK) {
                Some(range) => range.clone(),
                None => return Ok(None),
            }
        } else if let Some(partition_key) = request.headers.get(header_names::PARTITION_KEY) {
            match Self::try_resolve_by_partition_key(
                partition_key,
                collection,
                routing_map,
                collection_cache_is_up_to_date,
            )? {
                Some(range) => range,
                None => return Ok(None),
            }
        } else {
            match Self::try_resolve_single_partition_collection(
                collection,
                routing_map,
                collection_cache_is_up_to_date,
            )? {
                Some(range) => range,
                None => return Ok(None),
            }
        };

        let target = AddressTarget::Range(PartitionKeyRangeIdentity::new(
            collection.resource_id.clone(),
            range.id.clone(),
        ));
        let addresses = self
            .address_cache
            .try_get_addresses(request, &target, force_refresh)
            .await?;
        Ok(addresses.map(|addresses| (range, addresses)))
    }

    fn try_resolve_by_partition_key(
        partition_key_json: &str,
        collection: &ContainerProperties,
        routing_map: &CollectionRoutingMap,
        collection_cache_is_up_to_date: bool,
    ) -> ConsistencyResult<Option<PartitionKeyRange>> {
        let partition_key = PartitionKey::from_json(partition_key_json)?;

        if partition_key.len() == collection.partition_key_paths.len() {
            let epk = partition_key.effective_partition_key();
            return Ok(routing_map.range_by_effective_partition_key(&epk).cloned());
        }

        if collection_cache_is_up_to_date {
            return Err(StoreError::bad_request_with(
                sub_status::PARTITION_KEY_MISMATCH,
                format!(
                    "partition key {} has {} components but collection {} defines {}",
                    partition_key_json,
                    partition_key.len(),
                    collection.id,
                    collection.partition_key_paths.len()
                ),
            ));
        }

        // The cached definition may predate the collection being recreated.
        Ok(None)
    }

    fn try_resolve_single_partition_collection(
        collection: &ContainerProperties,
        routing_map: &CollectionRoutingMap,
        collection_cache_is_up_to_date: bool,
    ) -> ConsistencyResult<Option<PartitionKeyRange>> {
        if routing_map.len() == 1 {
            return Ok(routing_map.ordered_ranges().first().cloned());
        }

        if collection_cache_is_up_to_date {
            return Err(StoreError::bad_request_with(
                sub_status::MISSING_PARTITION_KEY,
                format!(
                    "collection {} has {} partitions; a partition key is required",
                    collection.id,
                    routing_map.len()
                ),
            ));
        }

        Ok(None)
    }
}

impl AddressResolution for AddressResolver {
    fn resolve_addresses<'a>(
        &'a self,
        request: &'a mut ServiceRequest,
        force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<PartitionAddressInformation>> {
        Box::pin(async move {
            let (addresses, _) = self.resolve(request, force_refresh).await?;
            Ok(addresses)
        })
    }
}
