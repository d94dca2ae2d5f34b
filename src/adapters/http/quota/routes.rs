//! Axum router configuration for quota and limit endpoints.

use axum::{routing::get, Router};

use super::handlers::{get_limit_status, get_quota, get_quota_history, health, QuotaAppState};

/// Tenant-facing endpoints, mounted under `/api`.
///
/// # Routes
/// - `GET /quota` - active period usage
/// - `GET /quota/history` - all periods, newest first
/// - `GET /limits/:service` - window status without consuming
pub fn quota_routes() -> Router<QuotaAppState> {
    Router::new()
        .route("/quota", get(get_quota))
        .route("/quota/history", get(get_quota_history))
        .route("/limits/:service", get(get_limit_status))
}

/// Liveness endpoint. Exempt from rate limiting.
pub fn health_routes() -> Router<QuotaAppState> {
    Router::new().route("/healthz", get(health))
}
