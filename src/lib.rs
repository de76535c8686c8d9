//! replicore - Replica-consistency core for a partitioned, multi-region
//! database client
//!
//! Turns a logical read or write into the replica calls that honor the
//! requested consistency level:
//!
//! - Session tokens and their partition-scoped wire format
//! - Address resolution onto partition key ranges and replica sets
//! - Quorum reads with read barriers and primary fallback
//! - Primary writes with the global strong write barrier
//! - Retry policies for gone replicas, stale routing, session races,
//!   regional failover and throttling

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;
pub mod routing;
pub mod session;
pub mod store;

pub use client::{StoreClient, StoreClientParts};
pub use config::{ConsistencyConfig, ConsistencyLevel};
pub use error::{ConsistencyResult, ErrorKind, StoreError};
