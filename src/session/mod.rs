//! Session consistency bookkeeping
//!
//! - [`SessionToken`]: vector clock over per-region LSNs (plus the legacy
//!   single-LSN form), with `is_valid` and `merge`
//! - [`SessionTokenHelper`]: partition-scoped wire format and resolution of
//!   the partition-local token sent to replicas

mod helper;
mod token;

pub use helper::SessionTokenHelper;
pub use token::{RegionId, SessionToken, VectorSessionToken};
