//! Barrier requests
//!
//! A barrier is a lightweight head read that only observes replica LSNs. It
//! targets the partition the original request resolved to and inherits its
//! deadline and diagnostics.

use crate::routing::PartitionKeyRangeIdentity;

use super::headers::{header_names, Headers};
use super::request::{OperationType, ResourceType, ServiceRequest};

/// Builds barrier requests for a resolved request.
pub struct BarrierRequestHelper;

impl BarrierRequestHelper {
    pub fn create(request: &ServiceRequest) -> ServiceRequest {
        let is_collection_child = request.context.resolved_partition_key_range.is_some();
        let (operation_type, resource_type) = if is_collection_child {
            (OperationType::Head, ResourceType::Collection)
        } else {
            (OperationType::HeadFeed, ResourceType::Database)
        };

        let mut barrier = ServiceRequest::new(
            operation_type,
            resource_type,
            request.resource_address.clone(),
        );
        barrier.activity_id = request.activity_id;
        barrier.is_name_based = request.is_name_based;
        barrier.headers = Headers::new().with(header_names::ACTIVITY_ID, request.activity_id);
        barrier.context = request.context.clone();
        barrier.context.quorum_selected_store_response = None;
        barrier.context.global_strong_write_store_result = None;

        match &request.context.resolved_partition_key_range {
            Some(range) => {
                let identity = match &request.context.resolved_collection_rid {
                    Some(rid) => PartitionKeyRangeIdentity::new(rid.clone(), range.id.clone()),
                    None => PartitionKeyRangeIdentity::for_range(range.id.clone()),
                };
                barrier
                    .headers
                    .set(header_names::PARTITION_KEY_RANGE_ID, range.id.clone());
                barrier.partition_key_range_identity = Some(identity);
            }
            None => {
                barrier.service_identity = request
                    .service_identity
                    .clone()
                    .or_else(|| request.context.target_identity.clone());
            }
        }

        if let Some(rid) = &request.context.resolved_collection_rid {
            barrier.headers.set(header_names::COLLECTION_RID, rid.clone());
        }

        barrier
    }

    /// Barrier asking replicas to report progress up to the given targets.
    pub fn create_with_targets(
        request: &ServiceRequest,
        target_lsn: i64,
        target_global_committed_lsn: i64,
    ) -> ServiceRequest {
        let mut barrier = Self::create(request);
        if target_lsn > 0 {
            barrier.headers.set(header_names::TARGET_LSN, target_lsn.to_string());
        }
        if target_global_committed_lsn > 0 {
            barrier.headers.set(
                header_names::TARGET_GLOBAL_COMMITTED_LSN,
                target_global_committed_lsn.to_string(),
            );
        }
        barrier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{PartitionKeyRange, ServiceIdentity};

    #[test]
    fn test_collection_barrier_targets_resolved_range() {
        let mut request =
            ServiceRequest::new(OperationType::Read, ResourceType::Document, "dbs/d/colls/c/docs/x")
                .with_session_token("0:1#5");
        request.context.resolved_partition_key_range = Some(PartitionKeyRange::new("3", "", "FF"));
        request.context.resolved_collection_rid = Some("rid-c".into());

        let barrier = BarrierRequestHelper::create_with_targets(&request, 12, 0);
        assert_eq!(barrier.operation_type, OperationType::Head);
        assert_eq!(barrier.activity_id, request.activity_id);
        assert_eq!(
            barrier.partition_key_range_identity,
            Some(PartitionKeyRangeIdentity::new("rid-c", "3"))
        );
        assert_eq!(barrier.headers.get_i64(header_names::TARGET_LSN), Some(12));
        assert!(!barrier.headers.contains(header_names::TARGET_GLOBAL_COMMITTED_LSN));
        assert!(!barrier.headers.contains(header_names::SESSION_TOKEN));
    }

    #[test]
    fn test_master_barrier_targets_identity() {
        let mut request = ServiceRequest::new(OperationType::Read, ResourceType::Database, "dbs/d");
        request.context.target_identity = Some(ServiceIdentity::new("fed", "master", true));

        let barrier = BarrierRequestHelper::create(&request);
        assert_eq!(barrier.operation_type, OperationType::HeadFeed);
        assert_eq!(
            barrier.service_identity.map(|s| s.service_name),
            Some("master".to_string())
        );
    }
}
