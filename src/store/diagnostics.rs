//! Request-scoped replica statistics
//!
//! One instance per logical request, shared by every concurrently racing
//! replica call. The only mutable state that crosses concurrent call
//! boundaries; guarded by a mutex.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::store_result::StoreResult;

/// One replica response as seen by the client.
#[derive(Debug, Clone)]
pub struct ReplicaResponseRecord {
    pub replica_uri: Option<String>,
    pub status: u16,
    pub sub_status: u32,
    pub lsn: i64,
    pub is_valid: bool,
    pub received_at: DateTime<Utc>,
    pub latency: Duration,
}

#[derive(Debug, Default)]
struct DiagnosticsInner {
    contacted_replicas: Vec<String>,
    failed_replicas: BTreeSet<String>,
    regions_contacted: BTreeSet<String>,
    responses: Vec<ReplicaResponseRecord>,
    address_resolutions: u32,
}

/// Shared per-request diagnostics.
#[derive(Debug, Default)]
pub struct RequestDiagnostics {
    inner: Mutex<DiagnosticsInner>,
}

/// Copy of the diagnostics at one point in time.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    pub contacted_replicas: Vec<String>,
    pub failed_replicas: Vec<String>,
    pub regions_contacted: Vec<String>,
    pub responses: Vec<ReplicaResponseRecord>,
    pub address_resolutions: u32,
}

impl RequestDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one replica outcome.
    pub fn record_response(&self, result: &StoreResult, region: Option<&str>, latency: Duration) {
        let mut inner = self.lock();
        if let Some(uri) = &result.replica_uri {
            inner.contacted_replicas.push(uri.clone());
            if !result.is_valid || result.is_gone_exception {
                inner.failed_replicas.insert(uri.clone());
            }
        }
        if let Some(region) = region {
            inner.regions_contacted.insert(region.to_string());
        }
        inner.responses.push(ReplicaResponseRecord {
            replica_uri: result.replica_uri.clone(),
            status: result.status,
            sub_status: result.sub_status,
            lsn: result.lsn,
            is_valid: result.is_valid,
            received_at: Utc::now(),
            latency,
        });
    }

    pub fn record_address_resolution(&self) {
        self.lock().address_resolutions += 1;
    }

    pub fn failed_replica_count(&self) -> usize {
        self.lock().failed_replicas.len()
    }

    pub fn response_count(&self) -> usize {
        self.lock().responses.len()
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let inner = self.lock();
        DiagnosticsSnapshot {
            contacted_replicas: inner.contacted_replicas.clone(),
            failed_replicas: inner.failed_replicas.iter().cloned().collect(),
            regions_contacted: inner.regions_contacted.iter().cloned().collect(),
            responses: inner.responses.clone(),
            address_resolutions: inner.address_resolutions,
        }
    }

    // A poisoned lock only means another replica task panicked mid-record;
    // the data is append-only and still usable.
    fn lock(&self) -> std::sync::MutexGuard<'_, DiagnosticsInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
