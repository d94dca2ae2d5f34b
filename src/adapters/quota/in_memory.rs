//! In-memory quota store.
//!
//! One write lock covers the compare-and-increment in `reserve`, so
//! concurrent reservations within a process never over-admit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::foundation::{TenantId, Timestamp};
use crate::domain::quota::{BillingPeriod, QuotaPolicy, QuotaRecord, SubscriptionTier};
use crate::ports::{QuotaStore, QuotaStoreError, Reservation};

/// In-memory quota store keyed by tenant.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQuotaStore {
    /// All records per tenant, oldest first.
    records: Arc<RwLock<HashMap<TenantId, Vec<QuotaRecord>>>>,
}

impl InMemoryQuotaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is (test fixture).
    pub async fn insert(&self, record: QuotaRecord) {
        let mut records = self.records.write().await;
        records.entry(record.tenant_id.clone()).or_default().push(record);
    }

    fn supersede_and_push(history: &mut Vec<QuotaRecord>, record: QuotaRecord, at: Timestamp) {
        for existing in history.iter_mut().filter(|r| r.is_active()) {
            existing.supersede(at);
        }
        history.push(record);
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn reserve(
        &self,
        tenant: &TenantId,
        policy: &QuotaPolicy,
        now: Timestamp,
    ) -> Result<Reservation, QuotaStoreError> {
        let mut records = self.records.write().await;
        let Some(active) = records
            .get_mut(tenant)
            .and_then(|history| history.iter_mut().find(|r| r.is_active()))
        else {
            return Ok(Reservation::NoActiveRecord);
        };

        if active.period.has_ended(now) {
            return Ok(Reservation::PeriodEnded(active.clone()));
        }
        if active.requests_used >= policy.limit_for(active.tier) {
            return Ok(Reservation::Exhausted(active.clone()));
        }

        active.requests_used += 1;
        Ok(Reservation::Reserved(active.clone()))
    }

    async fn active(&self, tenant: &TenantId) -> Result<Option<QuotaRecord>, QuotaStoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(tenant)
            .and_then(|history| history.iter().find(|r| r.is_active()))
            .cloned())
    }

    async fn activate(
        &self,
        tenant: &TenantId,
        tier: SubscriptionTier,
        period: BillingPeriod,
    ) -> Result<QuotaRecord, QuotaStoreError> {
        let record = QuotaRecord::new(tenant.clone(), tier, period);
        let mut records = self.records.write().await;
        let history = records.entry(tenant.clone()).or_default();
        Self::supersede_and_push(history, record.clone(), record.created_at);
        Ok(record)
    }

    async fn renew(
        &self,
        previous: &QuotaRecord,
        period: BillingPeriod,
    ) -> Result<QuotaRecord, QuotaStoreError> {
        let mut records = self.records.write().await;
        let history = records.entry(previous.tenant_id.clone()).or_default();

        if let Some(current) = history.iter().find(|r| r.is_active()) {
            if current.id != previous.id {
                return Ok(current.clone());
            }
        }

        let record = QuotaRecord::new(previous.tenant_id.clone(), previous.tier, period);
        Self::supersede_and_push(history, record.clone(), record.created_at);
        Ok(record)
    }

    async fn history(&self, tenant: &TenantId) -> Result<Vec<QuotaRecord>, QuotaStoreError> {
        let records = self.records.read().await;
        let mut history = records.get(tenant).cloned().unwrap_or_default();
        history.sort_by(|a, b| b.period.start.cmp(&a.period.start).then(b.created_at.cmp(&a.created_at)));
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new("tenant-a").unwrap()
    }

    fn current_month() -> BillingPeriod {
        BillingPeriod::calendar_month(Timestamp::now())
    }

    #[tokio::test]
    async fn reserve_without_record_reports_no_active_record() {
        let store = InMemoryQuotaStore::new();
        let outcome = store
            .reserve(&tenant(), &QuotaPolicy::default(), Timestamp::now())
            .await
            .unwrap();
        assert_eq!(outcome, Reservation::NoActiveRecord);
    }

    #[tokio::test]
    async fn reserve_increments_until_exhausted() {
        let store = InMemoryQuotaStore::new();
        let policy = QuotaPolicy::new(2, 10);
        store
            .activate(&tenant(), SubscriptionTier::Basic, current_month())
            .await
            .unwrap();

        for expected in 1..=2 {
            match store.reserve(&tenant(), &policy, Timestamp::now()).await.unwrap() {
                Reservation::Reserved(record) => assert_eq!(record.requests_used, expected),
                other => panic!("expected reservation, got {:?}", other),
            }
        }

        let outcome = store.reserve(&tenant(), &policy, Timestamp::now()).await.unwrap();
        assert!(matches!(outcome, Reservation::Exhausted(r) if r.requests_used == 2));
    }

    #[tokio::test]
    async fn ended_period_is_reported_before_limit() {
        let store = InMemoryQuotaStore::new();
        let period = current_month();
        store
            .activate(&tenant(), SubscriptionTier::Pro, period)
            .await
            .unwrap();

        let outcome = store
            .reserve(&tenant(), &QuotaPolicy::default(), period.end)
            .await
            .unwrap();
        assert!(matches!(outcome, Reservation::PeriodEnded(_)));
    }

    #[tokio::test]
    async fn activate_supersedes_previous_record() {
        let store = InMemoryQuotaStore::new();
        let first = store
            .activate(&tenant(), SubscriptionTier::Basic, current_month())
            .await
            .unwrap();
        let second = store
            .activate(&tenant(), SubscriptionTier::Pro, current_month())
            .await
            .unwrap();

        let active = store.active(&tenant()).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);

        let history = store.history(&tenant()).await.unwrap();
        assert_eq!(history.len(), 2);
        let old = history.iter().find(|r| r.id == first.id).unwrap();
        assert!(!old.is_active());
    }

    #[tokio::test]
    async fn renew_is_idempotent_for_stale_previous() {
        let store = InMemoryQuotaStore::new();
        let period = current_month();
        let first = store
            .activate(&tenant(), SubscriptionTier::Basic, period)
            .await
            .unwrap();

        let renewed = store.renew(&first, period.next()).await.unwrap();
        let again = store.renew(&first, period.next()).await.unwrap();

        assert_eq!(renewed.id, again.id);
        assert_eq!(renewed.tier, SubscriptionTier::Basic);
        assert_eq!(renewed.requests_used, 0);
        assert_eq!(store.history(&tenant()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_exceed_limit() {
        let store = InMemoryQuotaStore::new();
        let policy = QuotaPolicy::new(25, 100);
        store
            .activate(&tenant(), SubscriptionTier::Basic, current_month())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            let policy = policy.clone();
            handles.push(tokio::spawn(async move {
                store.reserve(&tenant(), &policy, Timestamp::now()).await.unwrap()
            }));
        }

        let mut reserved = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Reservation::Reserved(_)) {
                reserved += 1;
            }
        }

        assert_eq!(reserved, 25);
        let active = store.active(&tenant()).await.unwrap().unwrap();
        assert_eq!(active.requests_used, 25);
    }
}
