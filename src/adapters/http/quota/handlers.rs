//! HTTP handlers for quota and limit endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::application::{QuotaTracker, RateLimitCoordinator, RequestGate};
use crate::domain::rate_limit::{CallerId, LimitError};

use super::super::middleware::{LimitRejection, RequireTenant};
use super::dto::{
    HealthResponse, LimitStatusResponse, QuotaHistoryResponse, QuotaRecordResponse,
    QuotaUsageResponse,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for the HTTP surface.
///
/// Cloned per request; every field is reference counted.
#[derive(Clone, Debug)]
pub struct QuotaAppState {
    pub gate: RequestGate,
}

impl QuotaAppState {
    pub fn new(gate: RequestGate) -> Self {
        Self { gate }
    }

    pub fn coordinator(&self) -> &Arc<RateLimitCoordinator> {
        self.gate.coordinator()
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        self.gate.quota()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// GET /healthz
pub async fn health(State(state): State<QuotaAppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        services: state.coordinator().registry().len(),
        gate: state.gate.metrics().snapshot(),
    })
}

/// GET /api/quota - usage for the calling tenant's active period
pub async fn get_quota(
    State(state): State<QuotaAppState>,
    RequireTenant(tenant): RequireTenant,
) -> Result<impl IntoResponse, LimitRejection> {
    let usage = state
        .quota()
        .usage(&tenant.tenant_id)
        .await?
        .ok_or_else(|| LimitError::NoActiveSubscription(tenant.tenant_id.clone()))?;

    Ok(Json(QuotaUsageResponse::from(usage)))
}

/// GET /api/quota/history - all periods, newest first
pub async fn get_quota_history(
    State(state): State<QuotaAppState>,
    RequireTenant(tenant): RequireTenant,
) -> Result<impl IntoResponse, LimitRejection> {
    let tracker = state.quota();
    let records = tracker.history(&tenant.tenant_id).await?;

    let records = records
        .into_iter()
        .map(|record| {
            let limit = tracker.policy().limit_for(record.tier);
            QuotaRecordResponse::from_record(record, limit)
        })
        .collect();

    Ok(Json(QuotaHistoryResponse {
        tenant_id: tenant.tenant_id.to_string(),
        records,
    }))
}

/// GET /api/limits/:service - window status without consuming a slot
pub async fn get_limit_status(
    State(state): State<QuotaAppState>,
    RequireTenant(tenant): RequireTenant,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, LimitRejection> {
    let coordinator = state.coordinator();
    coordinator.registry().lookup(&service)?;

    let caller = CallerId::tenant(tenant.tenant_id);
    let status = coordinator.status(&service, &caller).await?;

    Ok(Json(LimitStatusResponse::from(status)))
}
