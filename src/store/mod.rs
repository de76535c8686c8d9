//! Replica I/O and consistency protocols
//!
//! Bottom-up:
//!
//! - [`StoreReader`] fans a request out to replicas and classifies answers
//! - [`QuorumReader`] turns replica answers into a quorum decision and runs
//!   read barriers
//! - [`ConsistencyReader`] / [`ConsistencyWriter`] pick the protocol from the
//!   effective consistency level
//! - [`ReplicatedResourceClient`] wraps both in gone / retry-with handling

mod address_selector;
mod barrier;
mod consistency_reader;
mod consistency_writer;
mod context;
mod diagnostics;
mod headers;
mod quorum;
mod random;
mod reader;
mod replicated;
mod request;
mod response;
mod store_result;
mod timeout;
mod transport;

pub use address_selector::{AddressResolution, AddressSelector};
pub use barrier::BarrierRequestHelper;
pub use consistency_reader::{ConsistencyReader, ReadPlan};
pub use consistency_writer::ConsistencyWriter;
pub use context::RequestContext;
pub use diagnostics::{DiagnosticsSnapshot, ReplicaResponseRecord, RequestDiagnostics};
pub use headers::{header_names, Headers};
pub use quorum::{QuorumEvaluation, QuorumReader, ReadQuorumResult, ReadQuorumResultKind};
pub use random::{NoRotation, RandomSource, SeededRandom, ThreadRandom};
pub use reader::{ReadMode, ReplicaReadOptions, StoreReader};
pub use replicated::ReplicatedResourceClient;
pub use request::{OperationType, ResourceType, ServiceRequest};
pub use response::StoreResponse;
pub use store_result::StoreResult;
pub use timeout::TimeoutHelper;
pub use transport::TransportClient;
