//! Shared fixtures for integration tests
//!
//! - Scripted transport: per-replica reply sequences, every call recorded
//! - Static address resolution over a fixed replica set
//! - In-memory routing caches
//! - Single-region endpoint manager

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use replicore::config::{ConsistencyConfig, ConsistencyLevel, ReplicationPolicy};
use replicore::error::{ConsistencyResult, TransportError};
use replicore::retry::EndpointManager;
use replicore::routing::{
    AddressCache, AddressInformation, AddressTarget, CollectionCache, CollectionRoutingMap,
    ContainerProperties, PartitionAddressInformation, PartitionKeyRange, RoutingMapCache,
    ServiceIdentity,
};
use replicore::store::{
    header_names, AddressResolution, Headers, NoRotation, OperationType, ServiceRequest,
    StoreResponse, TransportClient,
};
use replicore::{StoreClient, StoreClientParts};

pub const PRIMARY: &str = "rntbd://replica-0/";
pub const SECONDARY_1: &str = "rntbd://replica-1/";
pub const SECONDARY_2: &str = "rntbd://replica-2/";
pub const SECONDARY_3: &str = "rntbd://replica-3/";

pub type Reply = Result<StoreResponse, TransportError>;

// =============================================================================
// Replies
// =============================================================================

/// 200 carrying `lsn`.
pub fn ok(lsn: i64) -> StoreResponse {
    StoreResponse::new(200, Headers::new().with(header_names::LSN, lsn))
}

/// Primary answer with the headers a strong read inspects.
pub fn primary_ok(lsn: i64, quorum_acked_lsn: i64, replica_set_size: i64) -> StoreResponse {
    StoreResponse::new(
        200,
        Headers::new()
            .with(header_names::LSN, lsn)
            .with(header_names::QUORUM_ACKED_LSN, quorum_acked_lsn)
            .with(header_names::CURRENT_REPLICA_SET_SIZE, replica_set_size),
    )
}

/// Answer carrying a global committed LSN, for write barriers.
pub fn committed(lsn: i64, global_committed_lsn: i64) -> StoreResponse {
    StoreResponse::new(
        200,
        Headers::new()
            .with(header_names::LSN, lsn)
            .with(header_names::GLOBAL_COMMITTED_LSN, global_committed_lsn)
            .with(header_names::NUMBER_OF_READ_REGIONS, 1),
    )
}

pub fn gone() -> Reply {
    Err(TransportError::Gone("replica moved".to_string()))
}

// =============================================================================
// Transport
// =============================================================================

/// One recorded replica call.
#[derive(Debug, Clone)]
pub struct Call {
    pub uri: String,
    pub operation_type: OperationType,
    pub headers: Headers,
}

type Handler = Box<dyn Fn(&ServiceRequest) -> Reply + Send + Sync>;

/// Replies from per-replica scripts. Unknown replicas answer gone.
#[derive(Default)]
pub struct ScriptedTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply with `replies` in order; the last one repeats.
    pub fn script(&self, uri: &str, replies: Vec<Reply>) {
        let next = AtomicUsize::new(0);
        self.handle(uri, move |_| {
            let i = next.fetch_add(1, Ordering::SeqCst);
            let reply = replies.get(i).or_else(|| replies.last());
            match reply {
                Some(Ok(response)) => Ok(response.clone()),
                Some(Err(err)) => Err(err.clone()),
                None => Err(TransportError::Gone("no script".to_string())),
            }
        });
    }

    /// Reply with `response` on every call.
    pub fn always(&self, uri: &str, response: StoreResponse) {
        self.script(uri, vec![Ok(response)]);
    }

    pub fn handle<F>(&self, uri: &str, handler: F)
    where
        F: Fn(&ServiceRequest) -> Reply + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(uri.to_string(), Box::new(handler));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, uri: &str) -> usize {
        self.calls().iter().filter(|c| c.uri == uri).count()
    }

    pub fn calls_of(&self, operation_type: OperationType) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation_type == operation_type)
            .count()
    }
}

impl TransportClient for ScriptedTransport {
    fn invoke<'a>(
        &'a self,
        replica_uri: &'a str,
        request: &'a ServiceRequest,
    ) -> BoxFuture<'a, Result<StoreResponse, TransportError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call {
                uri: replica_uri.to_string(),
                operation_type: request.operation_type,
                headers: request.headers.clone(),
            });
            let handlers = self.handlers.lock().unwrap();
            match handlers.get(replica_uri) {
                Some(handler) => handler(request),
                None => Err(TransportError::Gone(format!("unknown replica {}", replica_uri))),
            }
        })
    }
}

// =============================================================================
// Address resolution
// =============================================================================

/// A primary and three secondaries for partition "0".
pub fn replica_set() -> PartitionAddressInformation {
    PartitionAddressInformation::new(
        ServiceIdentity::new("fed-1", "svc-coll-0", false),
        vec![
            AddressInformation::primary(PRIMARY),
            AddressInformation::secondary(SECONDARY_1),
            AddressInformation::secondary(SECONDARY_2),
            AddressInformation::secondary(SECONDARY_3),
        ],
    )
}

/// Resolves every request to one fixed replica set and range.
pub struct StaticResolver {
    addresses: PartitionAddressInformation,
    range: PartitionKeyRange,
    pub resolutions: AtomicUsize,
    pub forced: AtomicUsize,
}

impl StaticResolver {
    pub fn new(addresses: PartitionAddressInformation) -> Arc<Self> {
        Arc::new(Self {
            addresses,
            range: PartitionKeyRange::new("0", "", "FF"),
            resolutions: AtomicUsize::new(0),
            forced: AtomicUsize::new(0),
        })
    }

    pub fn forced_refreshes(&self) -> usize {
        self.forced.load(Ordering::SeqCst)
    }
}

impl AddressResolution for StaticResolver {
    fn resolve_addresses<'a>(
        &'a self,
        request: &'a mut ServiceRequest,
        force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<PartitionAddressInformation>> {
        Box::pin(async move {
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            if force_refresh {
                self.forced.fetch_add(1, Ordering::SeqCst);
            }
            request.context.target_identity = Some(self.addresses.service_identity.clone());
            request.context.resolved_partition_key_range = Some(self.range.clone());
            request.context.resolved_collection_rid = Some("coll-rid".to_string());
            Ok(self.addresses.clone())
        })
    }
}

// =============================================================================
// Routing caches
// =============================================================================

/// Serves `stale` until a forced refresh, then `fresh`.
pub struct FakeCollectionCache {
    stale: ContainerProperties,
    fresh: ContainerProperties,
    refreshed: Mutex<bool>,
    pub refreshes: AtomicUsize,
}

impl FakeCollectionCache {
    pub fn new(stale: ContainerProperties, fresh: ContainerProperties) -> Arc<Self> {
        Arc::new(Self {
            stale,
            fresh,
            refreshed: Mutex::new(false),
            refreshes: AtomicUsize::new(0),
        })
    }

    pub fn up_to_date(collection: ContainerProperties) -> Arc<Self> {
        Self::new(collection.clone(), collection)
    }
}

impl CollectionCache for FakeCollectionCache {
    fn resolve_collection<'a>(
        &'a self,
        _request: &'a ServiceRequest,
        force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<ContainerProperties>> {
        Box::pin(async move {
            let mut refreshed = self.refreshed.lock().unwrap();
            if force_refresh {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                *refreshed = true;
            }
            Ok(if *refreshed {
                self.fresh.clone()
            } else {
                self.stale.clone()
            })
        })
    }
}

/// Routing maps by collection rid.
#[derive(Default)]
pub struct FakeRoutingMapCache {
    maps: Mutex<HashMap<String, Arc<CollectionRoutingMap>>>,
    pub refreshes: AtomicUsize,
}

impl FakeRoutingMapCache {
    pub fn with_maps(maps: Vec<CollectionRoutingMap>) -> Arc<Self> {
        let cache = Self::default();
        {
            let mut by_rid = cache.maps.lock().unwrap();
            for map in maps {
                by_rid.insert(map.collection_rid().to_string(), Arc::new(map));
            }
        }
        Arc::new(cache)
    }
}

impl RoutingMapCache for FakeRoutingMapCache {
    fn lookup<'a>(
        &'a self,
        collection_rid: &'a str,
        previous: Option<&'a CollectionRoutingMap>,
    ) -> BoxFuture<'a, ConsistencyResult<Option<Arc<CollectionRoutingMap>>>> {
        Box::pin(async move {
            if previous.is_some() {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(self.maps.lock().unwrap().get(collection_rid).cloned())
        })
    }
}

/// Addresses by partition key range id.
#[derive(Default)]
pub struct FakeAddressCache {
    by_range: Mutex<HashMap<String, PartitionAddressInformation>>,
    pub lookups: AtomicUsize,
}

impl FakeAddressCache {
    pub fn with_ranges(ranges: Vec<(&str, PartitionAddressInformation)>) -> Arc<Self> {
        let cache = Self::default();
        {
            let mut by_range = cache.by_range.lock().unwrap();
            for (id, info) in ranges {
                by_range.insert(id.to_string(), info);
            }
        }
        Arc::new(cache)
    }
}

impl AddressCache for FakeAddressCache {
    fn try_get_addresses<'a>(
        &'a self,
        _request: &'a ServiceRequest,
        target: &'a AddressTarget,
        _force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<Option<PartitionAddressInformation>>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let by_range = self.by_range.lock().unwrap();
            Ok(match target {
                AddressTarget::Range(identity) => {
                    by_range.get(&identity.partition_key_range_id).cloned()
                }
                AddressTarget::Service(_) => None,
            })
        })
    }
}

// =============================================================================
// Endpoints
// =============================================================================

pub struct SingleRegion;

impl EndpointManager for SingleRegion {
    fn read_endpoints(&self) -> Vec<String> {
        vec!["https://west".to_string()]
    }

    fn write_endpoints(&self) -> Vec<String> {
        vec!["https://west".to_string()]
    }

    fn preferred_location_count(&self) -> usize {
        1
    }

    fn can_use_multiple_write_locations(&self, _request: &ServiceRequest) -> bool {
        false
    }

    fn resolve_service_endpoint(&self, _request: &ServiceRequest) -> String {
        "https://west".to_string()
    }

    fn mark_endpoint_unavailable_for_read(&self, _endpoint: &str) {}

    fn mark_endpoint_unavailable_for_write(&self, _endpoint: &str) {}

    fn refresh_location<'a>(
        &'a self,
        _force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Three-replica sets (read quorum 2) with the given account default.
pub fn config(default_consistency_level: ConsistencyLevel) -> ConsistencyConfig {
    let mut config = ConsistencyConfig::default();
    config.account.default_consistency_level = default_consistency_level;
    config.account.user_replication_policy = ReplicationPolicy {
        max_replica_set_size: 3,
        min_replica_set_size: 2,
    };
    config
}

pub fn client(
    config: ConsistencyConfig,
    transport: Arc<ScriptedTransport>,
    resolver: Arc<StaticResolver>,
) -> StoreClient {
    let parts = StoreClientParts::new(transport, resolver, Arc::new(SingleRegion))
        .with_random(Arc::new(NoRotation));
    StoreClient::new(config, parts).expect("valid config")
}

pub fn read_request() -> ServiceRequest {
    ServiceRequest::new(
        OperationType::Read,
        replicore::store::ResourceType::Document,
        "dbs/db/colls/coll/docs/item-1",
    )
    .with_partition_key(r#"["tenant-1"]"#)
}

pub fn create_request() -> ServiceRequest {
    ServiceRequest::new(
        OperationType::Create,
        replicore::store::ResourceType::Document,
        "dbs/db/colls/coll/docs",
    )
    .with_partition_key(r#"["tenant-1"]"#)
    .with_body(br#"{"id":"item-1"}"#.to_vec())
}
