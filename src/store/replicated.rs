//! Replicated resource client
//!
//! Routes a request to the consistency reader or writer and runs it under
//! the gone / retry-with policy.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::config::{ConsistencyConfig, ConsistencyLevel};
use crate::error::ConsistencyResult;
use crate::observability::MetricsRegistry;
use crate::retry::{self, Attempt, GoneAndRetryWithRetryPolicy, RetriableOperation};

use super::consistency_reader::ConsistencyReader;
use super::consistency_writer::ConsistencyWriter;
use super::reader::StoreReader;
use super::request::ServiceRequest;
use super::response::StoreResponse;

pub struct ReplicatedResourceClient {
    reader: ConsistencyReader,
    writer: ConsistencyWriter,
    config: ConsistencyConfig,
    metrics: Arc<MetricsRegistry>,
}

impl ReplicatedResourceClient {
    pub fn new(
        store_reader: Arc<StoreReader>,
        config: ConsistencyConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let reader = ConsistencyReader::new(
            Arc::clone(&store_reader),
            config.quorum.clone(),
            config.account.clone(),
            Arc::clone(&metrics),
        );
        let writer = ConsistencyWriter::new(
            store_reader,
            config.write_barrier.clone(),
            config.session_retry.clone(),
            config.account.clone(),
            Arc::clone(&metrics),
        );
        Self {
            reader,
            writer,
            config,
            metrics,
        }
    }

    pub fn consistency_reader(&self) -> &ConsistencyReader {
        &self.reader
    }

    pub fn consistency_writer(&self) -> &ConsistencyWriter {
        &self.writer
    }

    pub async fn invoke(&self, request: &mut ServiceRequest) -> ConsistencyResult<StoreResponse> {
        let strong = self.uses_strong_budget(request)?;
        let mut policy = GoneAndRetryWithRetryPolicy::new(&self.config.gone_retry, strong);
        retry::execute(
            &mut policy,
            request,
            &ReplicaAttempt { client: self },
            Attempt::first(),
        )
        .await
    }

    /// Strong reads and global strong writes wait out barriers, so they get
    /// the longer gone budget.
    fn uses_strong_budget(&self, request: &mut ServiceRequest) -> ConsistencyResult<bool> {
        if request.operation_type.is_write() {
            return Ok(self.writer.is_global_strong_enabled());
        }
        let level = self.reader.effective_consistency_level(request)?;
        Ok(level == ConsistencyLevel::Strong)
    }
}

struct ReplicaAttempt<'c> {
    client: &'c ReplicatedResourceClient,
}

impl RetriableOperation for ReplicaAttempt<'_> {
    type Output = StoreResponse;

    fn invoke<'a>(
        &'a self,
        request: &'a mut ServiceRequest,
        attempt: Attempt,
    ) -> BoxFuture<'a, ConsistencyResult<StoreResponse>> {
        Box::pin(async move {
            if attempt.is_in_retry {
                self.client.metrics.increment_retries();
            }
            if request.operation_type.is_write() {
                self.client.writer.write(request, attempt).await
            } else {
                self.client.reader.read(request, attempt).await
            }
        })
    }
}
