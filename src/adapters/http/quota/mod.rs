//! HTTP adapter for quota and limit endpoints.
//!
//! - `GET /healthz` - liveness and gate counters
//! - `GET /api/quota` - calling tenant's usage
//! - `GET /api/quota/history` - calling tenant's periods
//! - `GET /api/limits/:service` - window status for the calling tenant

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::QuotaAppState;
pub use routes::{health_routes, quota_routes};
