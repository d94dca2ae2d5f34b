//! Quota records.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{QuotaRecordId, TenantId, Timestamp};

use super::{BillingPeriod, SubscriptionTier};

/// Usage counter for one tenant and billing period.
///
/// One record per tenant is active at a time. Rollover and renewal supersede
/// the active record instead of deleting it so history stays queryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub id: QuotaRecordId,
    pub tenant_id: TenantId,
    pub tier: SubscriptionTier,
    pub period: BillingPeriod,
    pub requests_used: u32,
    pub created_at: Timestamp,
    pub superseded_at: Option<Timestamp>,
}

impl QuotaRecord {
    /// Creates a fresh, unused, active record.
    pub fn new(tenant_id: TenantId, tier: SubscriptionTier, period: BillingPeriod) -> Self {
        Self {
            id: QuotaRecordId::new(),
            tenant_id,
            tier,
            period,
            requests_used: 0,
            created_at: Timestamp::now(),
            superseded_at: None,
        }
    }

    /// Whether the record has not been superseded.
    pub fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }

    /// Units left under `limit`.
    pub fn remaining(&self, limit: u32) -> u32 {
        limit.saturating_sub(self.requests_used)
    }

    /// Marks the record as replaced.
    pub fn supersede(&mut self, at: Timestamp) {
        if self.superseded_at.is_none() {
            self.superseded_at = Some(at);
        }
    }
}
