//! Quota store port - durable, transactional usage records.
//!
//! `reserve` must compare and increment inside one transaction so two
//! concurrent billable actions cannot both observe `used < limit` for the
//! last remaining unit.

use async_trait::async_trait;

use crate::domain::foundation::{TenantId, Timestamp};
use crate::domain::quota::{BillingPeriod, QuotaPolicy, QuotaRecord, SubscriptionTier};

/// Port for the durable quota store.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Reserves one unit on the tenant's active record.
    async fn reserve(
        &self,
        tenant: &TenantId,
        policy: &QuotaPolicy,
        now: Timestamp,
    ) -> Result<Reservation, QuotaStoreError>;

    /// The tenant's active record, if any.
    async fn active(&self, tenant: &TenantId) -> Result<Option<QuotaRecord>, QuotaStoreError>;

    /// Creates a new active record, superseding the current one.
    ///
    /// Called on subscription activation, renewal and tier change.
    async fn activate(
        &self,
        tenant: &TenantId,
        tier: SubscriptionTier,
        period: BillingPeriod,
    ) -> Result<QuotaRecord, QuotaStoreError>;

    /// Rolls `previous` over into `period` with the same tier.
    ///
    /// Idempotent under races: when `previous` is no longer active the
    /// current active record is returned unchanged.
    async fn renew(
        &self,
        previous: &QuotaRecord,
        period: BillingPeriod,
    ) -> Result<QuotaRecord, QuotaStoreError>;

    /// All records for the tenant, newest period first.
    async fn history(&self, tenant: &TenantId) -> Result<Vec<QuotaRecord>, QuotaStoreError>;
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// One unit reserved; the record reflects the increment.
    Reserved(QuotaRecord),
    /// The ceiling was already reached; nothing changed.
    Exhausted(QuotaRecord),
    /// The active record's period is over and must be renewed first.
    PeriodEnded(QuotaRecord),
    /// The tenant has no active record.
    NoActiveRecord,
}

/// Errors from the quota store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaStoreError {
    /// Store unreachable, pool exhausted or statement timed out.
    #[error("quota store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to a record.
    #[error("corrupt quota record: {0}")]
    Corrupt(String),
}
