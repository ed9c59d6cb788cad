//! Permission arbitration for risk-bearing agent operations.
//!
//! - `risk`: fixed operation-type → risk-tier table with config overrides.
//! - `cache`: "allow all similar" decisions, owned by one arbiter.
//! - `arbiter`: threshold auto-approval and the host confirmation round trip.

pub mod arbiter;
pub mod cache;
pub mod risk;

pub use arbiter::PermissionArbiter;
pub use cache::PermissionCache;
pub use risk::RiskTable;
