//! Quota decisions.

use serde::Serialize;

use crate::domain::foundation::{TenantId, Timestamp};
use crate::domain::rate_limit::LimitError;

use super::{QuotaRecord, SubscriptionTier};

/// Why a quota check denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDenial {
    /// Period ceiling reached.
    Exhausted,
    /// No record covers the tenant.
    NoActiveSubscription,
    /// The durable store could not be reached.
    StoreUnavailable { reason: String },
}

/// Outcome of a quota reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub tenant_id: TenantId,
    pub allowed: bool,
    /// Units used after this reservation.
    pub used: u32,
    pub limit: u32,
    pub period_end: Option<Timestamp>,
    pub tier: Option<SubscriptionTier>,
    /// Admitted without metering while the store was down (grace period).
    pub degraded: bool,
    pub denial: Option<QuotaDenial>,
}

impl QuotaDecision {
    /// Decision derived from a stored record.
    pub fn from_record(record: &QuotaRecord, limit: u32, allowed: bool) -> Self {
        Self {
            tenant_id: record.tenant_id.clone(),
            allowed,
            used: record.requests_used,
            limit,
            period_end: Some(record.period.end),
            tier: Some(record.tier),
            degraded: false,
            denial: (!allowed).then_some(QuotaDenial::Exhausted),
        }
    }

    /// Denial without a record to report on.
    pub fn denied(tenant_id: TenantId, denial: QuotaDenial) -> Self {
        Self {
            tenant_id,
            allowed: false,
            used: 0,
            limit: 0,
            period_end: None,
            tier: None,
            degraded: false,
            denial: Some(denial),
        }
    }

    /// Unmetered admission during a store outage grace period.
    pub fn degraded(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            allowed: true,
            used: 0,
            limit: 0,
            period_end: None,
            tier: None,
            degraded: true,
            denial: None,
        }
    }

    /// Units left in the period.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    /// Converts a denial into its `LimitError`.
    pub fn into_result(self) -> Result<Self, LimitError> {
        match &self.denial {
            None => Ok(self),
            Some(QuotaDenial::Exhausted) => Err(LimitError::QuotaExceeded {
                tenant: self.tenant_id,
                limit: self.limit,
                used: self.used,
                period_end: self.period_end.unwrap_or_else(Timestamp::now),
            }),
            Some(QuotaDenial::NoActiveSubscription) => {
                Err(LimitError::NoActiveSubscription(self.tenant_id))
            }
            Some(QuotaDenial::StoreUnavailable { reason }) => {
                Err(LimitError::store_unavailable("quota", reason.clone()))
            }
        }
    }
}
