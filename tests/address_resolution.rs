//! Address Resolution Tests
//!
//! Routing through collection, routing map and address caches:
//! - Stale collection definitions are refreshed once
//! - Explicit ranges that vanished surface as gone
//! - Retries stay within the first resolved range lineage

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;

use common::*;
use replicore::config::ConsistencyLevel;
use replicore::error::{sub_status, ConsistencyResult, ErrorKind, StoreError};
use replicore::routing::{
    AddressResolver, CollectionRoutingMap, ContainerProperties, PartitionAddressInformation,
    PartitionKeyRange, PartitionKeyRangeIdentity,
};
use replicore::store::{
    header_names, AddressResolution, NoRotation, OperationType, ResourceType, ServiceRequest,
};
use replicore::{StoreClient, StoreClientParts};

fn single_range_map(rid: &str) -> CollectionRoutingMap {
    CollectionRoutingMap::new(rid, vec![PartitionKeyRange::new("0", "", "FF")], 1).unwrap()
}

fn split_map(rid: &str, left_parents: &[&str]) -> CollectionRoutingMap {
    CollectionRoutingMap::new(
        rid,
        vec![
            PartitionKeyRange::new("2", "", "80").with_parents(left_parents.iter().copied()),
            PartitionKeyRange::new("3", "80", "FF").with_parents(["0"]),
        ],
        2,
    )
    .unwrap()
}

/// Serves cached addresses; every forced refresh fails.
struct RefreshFailingResolver {
    inner: Arc<StaticResolver>,
    failed_refreshes: AtomicUsize,
}

impl AddressResolution for RefreshFailingResolver {
    fn resolve_addresses<'a>(
        &'a self,
        request: &'a mut ServiceRequest,
        force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<PartitionAddressInformation>> {
        Box::pin(async move {
            if force_refresh {
                self.failed_refreshes.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::service_unavailable(
                    sub_status::UNKNOWN,
                    "address service unreachable",
                ));
            }
            self.inner.resolve_addresses(request, false).await
        })
    }
}

fn two_key_request() -> ServiceRequest {
    ServiceRequest::new(
        OperationType::Read,
        ResourceType::Document,
        "dbs/db/colls/coll/docs/item-1",
    )
    .with_partition_key(r#"["a","b"]"#)
}

// =============================================================================
// Stale Collection Cache
// =============================================================================

/// The cached definition has one key path, the recreated collection two.
#[tokio::test]
async fn test_stale_definition_defers_to_refresh() {
    let stale = ContainerProperties::new("coll", "rid-old").with_partition_key_paths(["/a"]);
    let routing = FakeRoutingMapCache::with_maps(vec![single_range_map("rid-old")]);
    let addresses = FakeAddressCache::with_ranges(vec![("0", replica_set())]);
    let resolver = AddressResolver::new(
        FakeCollectionCache::up_to_date(stale.clone()),
        routing,
        addresses,
    );

    let map = single_range_map("rid-old");
    let request = two_key_request();

    let deferred = resolver
        .try_resolve_server_partition(&request, &stale, &map, false, false, false)
        .await
        .unwrap();
    assert!(deferred.is_none());

    let err = resolver
        .try_resolve_server_partition(&request, &stale, &map, true, true, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
    assert_eq!(err.sub_status, sub_status::PARTITION_KEY_MISMATCH);
}

#[tokio::test]
async fn test_recreated_collection_resolves_after_one_refresh() {
    let stale = ContainerProperties::new("coll", "rid-old").with_partition_key_paths(["/a"]);
    let fresh =
        ContainerProperties::new("coll", "rid-new").with_partition_key_paths(["/a", "/b"]);
    let collections = FakeCollectionCache::new(stale, fresh);
    let routing = FakeRoutingMapCache::with_maps(vec![
        single_range_map("rid-old"),
        single_range_map("rid-new"),
    ]);
    let addresses = FakeAddressCache::with_ranges(vec![("0", replica_set())]);
    let resolver = AddressResolver::new(collections.clone(), routing, addresses);

    let mut request = two_key_request();
    let (info, identity) = resolver.resolve(&mut request, false).await.unwrap();

    assert_eq!(identity.service_name, "svc-coll-0");
    assert_eq!(info.primary().map(|a| a.uri.as_str()), Some(PRIMARY));
    assert_eq!(collections.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(
        request.context.resolved_collection_rid.as_deref(),
        Some("rid-new")
    );
    assert_eq!(request.headers.get(header_names::COLLECTION_RID), Some("rid-new"));
    assert!(!request.force_name_cache_refresh);
}

#[tokio::test]
async fn test_missing_routing_map_is_invalid_partition() {
    let collection = ContainerProperties::new("coll", "rid-unknown");
    let resolver = AddressResolver::new(
        FakeCollectionCache::up_to_date(collection),
        FakeRoutingMapCache::with_maps(Vec::new()),
        FakeAddressCache::with_ranges(Vec::new()),
    );

    let mut request = read_request();
    let err = resolver.resolve(&mut request, false).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidPartition);
}

#[tokio::test]
async fn test_multi_range_collection_requires_partition_key() {
    let collection = ContainerProperties::new("coll", "rid").with_partition_key_paths(["/a"]);
    let resolver = AddressResolver::new(
        FakeCollectionCache::up_to_date(collection),
        FakeRoutingMapCache::with_maps(vec![split_map("rid", &["0"])]),
        FakeAddressCache::with_ranges(vec![("2", replica_set()), ("3", replica_set())]),
    );

    let mut request = ServiceRequest::new(
        OperationType::Read,
        ResourceType::Document,
        "dbs/db/colls/coll/docs/item-1",
    );
    let err = resolver.resolve(&mut request, false).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::BadRequest);
    assert_eq!(err.sub_status, sub_status::MISSING_PARTITION_KEY);
}

// =============================================================================
// Explicit Ranges
// =============================================================================

#[tokio::test]
async fn test_vanished_range_is_gone_after_routing_refresh() {
    let collection = ContainerProperties::new("coll", "rid").with_partition_key_paths(["/a"]);
    let routing = FakeRoutingMapCache::with_maps(vec![split_map("rid", &["0"])]);
    let resolver = AddressResolver::new(
        FakeCollectionCache::up_to_date(collection),
        routing.clone(),
        FakeAddressCache::with_ranges(vec![("2", replica_set())]),
    );

    let mut request = read_request()
        .with_partition_key_range(PartitionKeyRangeIdentity::new("rid", "9"));
    let err = resolver.resolve(&mut request, false).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::PartitionKeyRangeGone);
    assert_eq!(routing.refreshes.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Target Continuity
// =============================================================================

#[tokio::test]
async fn test_retry_onto_unrelated_range_is_invalid_target() {
    let collection = ContainerProperties::new("coll", "rid").with_partition_key_paths(["/a"]);
    let resolver = AddressResolver::new(
        FakeCollectionCache::up_to_date(collection),
        FakeRoutingMapCache::with_maps(vec![split_map("rid", &["0"])]),
        FakeAddressCache::with_ranges(vec![("2", replica_set())]),
    );

    let mut request = read_request()
        .with_partition_key_range(PartitionKeyRangeIdentity::new("rid", "2"));
    request.context.resolved_partition_key_range = Some(PartitionKeyRange::new("1", "", "80"));
    request.context.resolved_collection_rid = Some("rid".to_string());

    let err = resolver.resolve(&mut request, false).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidTarget);
    assert_eq!(err.sub_status, sub_status::TARGET_CHANGED);
    assert_eq!(
        request.context.resolved_partition_key_range.map(|r| r.id),
        Some("1".to_string())
    );
}

#[tokio::test]
async fn test_retry_onto_child_range_is_accepted() {
    let collection = ContainerProperties::new("coll", "rid").with_partition_key_paths(["/a"]);
    let resolver = AddressResolver::new(
        FakeCollectionCache::up_to_date(collection),
        FakeRoutingMapCache::with_maps(vec![split_map("rid", &["1"])]),
        FakeAddressCache::with_ranges(vec![("2", replica_set())]),
    );

    let mut request = read_request()
        .with_partition_key_range(PartitionKeyRangeIdentity::new("rid", "2"));
    request.context.resolved_partition_key_range = Some(PartitionKeyRange::new("1", "", "80"));
    request.context.resolved_collection_rid = Some("rid".to_string());

    resolver.resolve(&mut request, false).await.unwrap();

    assert_eq!(
        request.context.resolved_partition_key_range.map(|r| r.id),
        Some("2".to_string())
    );
}

// =============================================================================
// Through the Client
// =============================================================================

#[tokio::test]
async fn test_client_reads_through_resolver() {
    let collection = ContainerProperties::new("coll", "rid").with_partition_key_paths(["/tenant"]);
    let resolver = AddressResolver::new(
        FakeCollectionCache::up_to_date(collection),
        FakeRoutingMapCache::with_maps(vec![single_range_map("rid")]),
        FakeAddressCache::with_ranges(vec![("0", replica_set())]),
    );
    let transport = ScriptedTransport::new();
    transport.always(PRIMARY, ok(3));
    let parts = StoreClientParts::new(
        transport.clone(),
        Arc::new(resolver),
        Arc::new(SingleRegion),
    )
    .with_random(Arc::new(NoRotation));
    let client = StoreClient::new(config(ConsistencyLevel::Eventual), parts).unwrap();

    let mut request = read_request();
    let response = client.read(&mut request).await.unwrap();

    assert_eq!(response.lsn(), 3);
    assert_eq!(transport.calls_to(PRIMARY), 1);
    assert_eq!(
        request.context.resolved_partition_key_range.map(|r| r.id),
        Some("0".to_string())
    );
}

// =============================================================================
// Background Refresh
// =============================================================================

/// A gone replica starts an address refresh off the request path; its
/// failure is logged and the read is served by the next replica.
#[tokio::test]
async fn test_failed_background_refresh_does_not_fail_read() {
    let transport = ScriptedTransport::new();
    transport.script(PRIMARY, vec![gone()]);
    transport.always(SECONDARY_1, ok(5));
    let resolver = Arc::new(RefreshFailingResolver {
        inner: StaticResolver::new(replica_set()),
        failed_refreshes: AtomicUsize::new(0),
    });
    let parts = StoreClientParts::new(transport.clone(), resolver.clone(), Arc::new(SingleRegion))
        .with_random(Arc::new(NoRotation));
    let client = StoreClient::new(config(ConsistencyLevel::Session), parts).unwrap();

    let response = client.read(&mut read_request()).await.unwrap();
    assert_eq!(response.lsn(), 5);
    assert_eq!(transport.calls_to(PRIMARY), 1);
    assert_eq!(transport.calls_to(SECONDARY_1), 1);

    for _ in 0..10 {
        if resolver.failed_refreshes.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(resolver.failed_refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(client.metrics().background_refreshes, 1);

    let again = client.read(&mut read_request()).await.unwrap();
    assert_eq!(again.lsn(), 5);
}
