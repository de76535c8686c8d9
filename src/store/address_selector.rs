//! Replica address selection on top of address resolution

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::{sub_status, ConsistencyResult, StoreError};
use crate::routing::{AddressInformation, PartitionAddressInformation};

use super::request::ServiceRequest;

/// Resolves a request to the replica set that serves it.
pub trait AddressResolution: Send + Sync {
    fn resolve_addresses<'a>(
        &'a self,
        request: &'a mut ServiceRequest,
        force_refresh: bool,
    ) -> BoxFuture<'a, ConsistencyResult<PartitionAddressInformation>>;
}

/// Picks replica URIs out of a resolved replica set.
#[derive(Clone)]
pub struct AddressSelector {
    resolver: Arc<dyn AddressResolution>,
}

impl AddressSelector {
    pub fn new(resolver: Arc<dyn AddressResolution>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> Arc<dyn AddressResolution> {
        Arc::clone(&self.resolver)
    }

    pub async fn resolve_addresses(
        &self,
        request: &mut ServiceRequest,
        force_refresh: bool,
    ) -> ConsistencyResult<PartitionAddressInformation> {
        self.resolver.resolve_addresses(request, force_refresh).await
    }

    /// All candidate replicas, optionally without the primary.
    pub async fn resolve_all_uris(
        &self,
        request: &mut ServiceRequest,
        include_primary: bool,
        force_refresh: bool,
    ) -> ConsistencyResult<Vec<AddressInformation>> {
        let info = self.resolve_addresses(request, force_refresh).await?;
        Ok(info
            .replicas(include_primary)
            .into_iter()
            .cloned()
            .collect())
    }

    /// The primary, or the replica pinned by `default_replica_index`.
    pub async fn resolve_primary_uri(
        &self,
        request: &mut ServiceRequest,
        force_refresh: bool,
    ) -> ConsistencyResult<AddressInformation> {
        let info = self.resolve_addresses(request, force_refresh).await?;

        if let Some(index) = request.default_replica_index.filter(|index| *index != 0) {
            if let Some(pinned) = info.addresses.get(index) {
                return Ok(pinned.clone());
            }
        }

        info.primary().cloned().ok_or_else(|| {
            StoreError::gone_with(
                sub_status::PRIMARY_NOT_FOUND,
                format!(
                    "no primary replica for service {}",
                    info.service_identity.service_name
                ),
            )
        })
    }
}
