//! HTTP DTOs for quota and limit endpoints.

use serde::Serialize;

use crate::application::GateMetricsSnapshot;
use crate::domain::quota::{QuotaDecision, QuotaRecord, SubscriptionTier};
use crate::domain::rate_limit::{LimitTier, RateLimitDecision};

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Current-period usage for the calling tenant.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaUsageResponse {
    pub tenant_id: String,
    pub tier: Option<SubscriptionTier>,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    /// End of the current period (RFC 3339).
    pub period_end: Option<String>,
}

impl From<QuotaDecision> for QuotaUsageResponse {
    fn from(decision: QuotaDecision) -> Self {
        Self {
            remaining: decision.remaining(),
            tenant_id: decision.tenant_id.to_string(),
            tier: decision.tier,
            used: decision.used,
            limit: decision.limit,
            period_end: decision.period_end.map(|end| end.to_rfc3339()),
        }
    }
}

/// One billing period in a tenant's history.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaRecordResponse {
    pub id: String,
    pub tier: SubscriptionTier,
    pub period_start: String,
    pub period_end: String,
    pub requests_used: u32,
    pub limit: u32,
    pub active: bool,
    pub superseded_at: Option<String>,
}

impl QuotaRecordResponse {
    pub fn from_record(record: QuotaRecord, limit: u32) -> Self {
        Self {
            id: record.id.to_string(),
            tier: record.tier,
            period_start: record.period.start.to_rfc3339(),
            period_end: record.period.end.to_rfc3339(),
            requests_used: record.requests_used,
            limit,
            active: record.is_active(),
            superseded_at: record.superseded_at.map(|at| at.to_rfc3339()),
        }
    }
}

/// All periods for the calling tenant, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaHistoryResponse {
    pub tenant_id: String,
    pub records: Vec<QuotaRecordResponse>,
}

/// Window status for one service, read without consuming.
#[derive(Debug, Clone, Serialize)]
pub struct LimitStatusResponse {
    pub service: String,
    pub tier: LimitTier,
    pub limit: u32,
    pub usage: u32,
    pub remaining: u32,
    /// Unix seconds.
    pub reset_at: u64,
    pub upstream_capped: bool,
    pub degraded: bool,
}

impl From<RateLimitDecision> for LimitStatusResponse {
    fn from(decision: RateLimitDecision) -> Self {
        Self {
            service: decision.service,
            tier: decision.tier,
            limit: decision.limit,
            usage: decision.usage,
            remaining: decision.remaining,
            reset_at: decision.reset_at.as_unix_secs(),
            upstream_capped: decision.upstream_capped,
            degraded: decision.degraded,
        }
    }
}

/// Liveness plus admission counters.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub services: usize,
    pub gate: GateMetricsSnapshot,
}
