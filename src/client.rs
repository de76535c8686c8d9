//! Store client
//!
//! Entry point for one logical request: stamps the request deadline and
//! runs the replicated resource client under cross-region retries.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::config::{ConfigError, ConsistencyConfig};
use crate::error::{ConsistencyResult, StoreError};
use crate::observability::{MetricsRegistry, MetricsSnapshot};
use crate::retry::{self, Attempt, ClientRetryPolicy, EndpointManager, RetriableOperation};
use crate::store::{
    AddressResolution, AddressSelector, RandomSource, ReplicatedResourceClient, ServiceRequest,
    StoreReader, StoreResponse, ThreadRandom, TimeoutHelper, TransportClient,
};

/// External capabilities the client runs against.
#[derive(Clone)]
pub struct StoreClientParts {
    pub transport: Arc<dyn TransportClient>,
    pub resolver: Arc<dyn AddressResolution>,
    pub endpoints: Arc<dyn EndpointManager>,
    pub random: Arc<dyn RandomSource>,
    pub metrics: Arc<MetricsRegistry>,
}

impl StoreClientParts {
    pub fn new(
        transport: Arc<dyn TransportClient>,
        resolver: Arc<dyn AddressResolution>,
        endpoints: Arc<dyn EndpointManager>,
    ) -> Self {
        Self {
            transport,
            resolver,
            endpoints,
            random: Arc::new(ThreadRandom),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }
}

pub struct StoreClient {
    replicated: ReplicatedResourceClient,
    endpoints: Arc<dyn EndpointManager>,
    config: ConsistencyConfig,
    metrics: Arc<MetricsRegistry>,
}

impl StoreClient {
    pub fn new(config: ConsistencyConfig, parts: StoreClientParts) -> Result<Self, ConfigError> {
        config.validate()?;

        let store_reader = Arc::new(StoreReader::new(
            parts.transport,
            AddressSelector::new(parts.resolver),
            parts.random,
            Arc::clone(&parts.metrics),
        ));
        let replicated =
            ReplicatedResourceClient::new(store_reader, config.clone(), Arc::clone(&parts.metrics));

        Ok(Self {
            replicated,
            endpoints: parts.endpoints,
            config,
            metrics: parts.metrics,
        })
    }

    pub fn config(&self) -> &ConsistencyConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Read under the effective consistency level.
    pub async fn read(&self, request: &mut ServiceRequest) -> ConsistencyResult<StoreResponse> {
        if request.operation_type.is_write() {
            return Err(StoreError::bad_request(format!(
                "{:?} is not a read operation",
                request.operation_type
            )));
        }
        self.process_message(request).await
    }

    /// Write to the primary, waiting on the global strong barrier when the
    /// account requires it.
    pub async fn write(&self, request: &mut ServiceRequest) -> ConsistencyResult<StoreResponse> {
        if !request.operation_type.is_write() {
            return Err(StoreError::bad_request(format!(
                "{:?} is not a write operation",
                request.operation_type
            )));
        }
        self.process_message(request).await
    }

    pub async fn process_message(
        &self,
        request: &mut ServiceRequest,
    ) -> ConsistencyResult<StoreResponse> {
        request.context.timeout_helper = TimeoutHelper::new(self.config.request_timeout());

        let mut policy =
            ClientRetryPolicy::new(Arc::clone(&self.endpoints), &self.config.client_retry);
        let outcome = retry::execute(
            &mut policy,
            request,
            &RegionAttempt { client: self },
            Attempt::first(),
        )
        .await;

        if let Err(err) = &outcome {
            tracing::debug!(
                target: "replicore",
                activity_id = %request.activity_id,
                resource = %request.resource_address,
                status = err.status,
                sub_status = err.sub_status,
                "request failed"
            );
        }
        outcome
    }
}

struct RegionAttempt<'c> {
    client: &'c StoreClient,
}

impl RetriableOperation for RegionAttempt<'_> {
    type Output = StoreResponse;

    fn invoke<'a>(
        &'a self,
        request: &'a mut ServiceRequest,
        _attempt: Attempt,
    ) -> BoxFuture<'a, ConsistencyResult<StoreResponse>> {
        Box::pin(self.client.replicated.invoke(request))
    }
}
