//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Coordination Ports
//!
//! - `SlidingWindowStore` - Shared sliding-window counter with upstream ceilings
//!
//! ## Persistence Ports
//!
//! - `QuotaStore` - Durable per-tenant quota records with atomic reservation

mod quota_store;
mod rate_limiter;

pub use quota_store::{QuotaStore, QuotaStoreError, Reservation};
pub use rate_limiter::{SlidingWindowStore, StoreError, WindowAdmission, WindowUsage};
