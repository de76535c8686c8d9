//! Transport capability
//!
//! The wire protocol lives outside this crate. A transport sends one request
//! to one physical replica and either returns the raw response or a
//! classified failure.

use futures_util::future::BoxFuture;

use crate::error::TransportError;

use super::request::ServiceRequest;
use super::response::StoreResponse;

/// Sends requests to physical replicas.
pub trait TransportClient: Send + Sync {
    /// Send `request` to the replica at `replica_uri`.
    fn invoke<'a>(
        &'a self,
        replica_uri: &'a str,
        request: &'a ServiceRequest,
    ) -> BoxFuture<'a, Result<StoreResponse, TransportError>>;
}
