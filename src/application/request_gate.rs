//! RequestGate - inbound admission for the platform's own API.
//!
//! Every non-exempt request passes the per-minute and per-hour windows for
//! its caller, then (for authenticated tenants) reserves one unit of the
//! tenant's period quota. The windows are cheap and shared; quota is only
//! touched once the windows admit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::domain::foundation::TenantId;
use crate::domain::quota::{QuotaDecision, QuotaDenial};
use crate::domain::rate_limit::{CallerId, LimitError, RateLimitDecision};

use super::coordinator::most_constraining;
use super::{QuotaTracker, RateLimitCoordinator};

/// Per-minute platform API window.
pub const API_MINUTE: &str = "api-minute";

/// Per-hour platform API window.
pub const API_HOUR: &str = "api-hour";

/// Services every inbound request is checked against.
pub const GATE_SERVICES: [&str; 2] = [API_MINUTE, API_HOUR];

/// Result of evaluating one inbound request.
#[derive(Debug, Clone)]
pub enum GateVerdict {
    /// Forward the request.
    Admitted {
        /// The window closest to its limit, for response headers.
        rate: Option<RateLimitDecision>,
        /// Quota state after reservation; `None` for anonymous callers.
        quota: Option<QuotaDecision>,
        /// Some window or the quota admitted without consulting its store.
        degraded: bool,
    },
    /// A sliding window denied.
    RateLimited(RateLimitDecision),
    /// The tenant's quota denied, or the quota store is unavailable.
    QuotaDenied(QuotaDecision),
}

impl GateVerdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateVerdict::Admitted { .. })
    }
}

/// Admission counters, readable from `/healthz`.
#[derive(Debug, Default)]
pub struct GateMetrics {
    admitted: AtomicU64,
    rate_limited: AtomicU64,
    quota_denied: AtomicU64,
    quota_unavailable: AtomicU64,
    degraded: AtomicU64,
}

/// Point-in-time copy of [`GateMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateMetricsSnapshot {
    pub admitted: u64,
    pub rate_limited: u64,
    pub quota_denied: u64,
    pub quota_unavailable: u64,
    pub degraded: u64,
}

impl GateMetrics {
    pub fn snapshot(&self) -> GateMetricsSnapshot {
        GateMetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            quota_denied: self.quota_denied.load(Ordering::Relaxed),
            quota_unavailable: self.quota_unavailable.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    fn record(&self, verdict: &GateVerdict) {
        let counter = match verdict {
            GateVerdict::Admitted { degraded, .. } => {
                if *degraded {
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                }
                &self.admitted
            }
            GateVerdict::RateLimited(_) => &self.rate_limited,
            GateVerdict::QuotaDenied(decision) => match decision.denial {
                Some(QuotaDenial::StoreUnavailable { .. }) => &self.quota_unavailable,
                _ => &self.quota_denied,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Combines the coordinator and quota tracker for inbound requests.
#[derive(Clone)]
pub struct RequestGate {
    coordinator: Arc<RateLimitCoordinator>,
    quota: Arc<QuotaTracker>,
    metrics: Arc<GateMetrics>,
}

impl RequestGate {
    pub fn new(coordinator: Arc<RateLimitCoordinator>, quota: Arc<QuotaTracker>) -> Self {
        Self {
            coordinator,
            quota,
            metrics: Arc::new(GateMetrics::default()),
        }
    }

    pub fn coordinator(&self) -> &Arc<RateLimitCoordinator> {
        &self.coordinator
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    pub fn metrics(&self) -> &GateMetrics {
        &self.metrics
    }

    /// Checks the API windows for `caller`, then reserves quota for `tenant`.
    ///
    /// Errors only when the registry cannot resolve the gate services at all.
    pub async fn evaluate(
        &self,
        caller: &CallerId,
        tenant: Option<&TenantId>,
    ) -> Result<GateVerdict, LimitError> {
        let verdict = self.decide(caller, tenant).await?;
        self.metrics.record(&verdict);
        Ok(verdict)
    }

    async fn decide(
        &self,
        caller: &CallerId,
        tenant: Option<&TenantId>,
    ) -> Result<GateVerdict, LimitError> {
        let decisions = self.coordinator.check_all(&GATE_SERVICES, caller).await?;

        if let Some(denied) = decisions.iter().find(|d| !d.allowed) {
            debug!(
                caller = %caller.redacted(),
                service = %denied.service,
                retry_after_secs = denied.retry_after_secs(),
                "request rate limited"
            );
            return Ok(GateVerdict::RateLimited(denied.clone()));
        }

        let rate = most_constraining(&decisions).cloned();
        let windows_degraded = decisions.iter().any(|d| d.degraded);

        let quota = match tenant {
            Some(tenant) => {
                let decision = self.quota.check_and_reserve(tenant).await;
                if !decision.allowed {
                    return Ok(GateVerdict::QuotaDenied(decision));
                }
                Some(decision)
            }
            None => None,
        };

        let degraded = windows_degraded || quota.as_ref().is_some_and(|q| q.degraded);
        Ok(GateVerdict::Admitted {
            rate,
            quota,
            degraded,
        })
    }
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
