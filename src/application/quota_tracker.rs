//! QuotaTracker - calendar-period quota enforcement.
//!
//! Unlike the coordinator, the tracker fails closed: quota is billing, and an
//! unmetered admission cannot be reconciled afterwards. An optional grace
//! window admits (flagged `degraded`) during the first seconds of an outage.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::foundation::{TenantId, Timestamp};
use crate::domain::quota::{
    BillingPeriod, QuotaDecision, QuotaDenial, QuotaPolicy, QuotaRecord, SubscriptionTier,
};
use crate::domain::rate_limit::LimitError;
use crate::ports::{QuotaStore, QuotaStoreError, Reservation};

/// Meters billable actions against each tenant's period quota.
pub struct QuotaTracker {
    store: Arc<dyn QuotaStore>,
    policy: QuotaPolicy,
    outage_grace: Duration,
    /// Start of the current continuous outage, if any.
    outage_since: Mutex<Option<Instant>>,
}

impl QuotaTracker {
    /// Creates a strictly fail-closed tracker.
    pub fn new(store: Arc<dyn QuotaStore>, policy: QuotaPolicy) -> Self {
        Self {
            store,
            policy,
            outage_grace: Duration::ZERO,
            outage_since: Mutex::new(None),
        }
    }

    /// Admits unmetered for up to `grace` after a store outage begins.
    pub fn with_outage_grace(mut self, grace: Duration) -> Self {
        self.outage_grace = grace;
        self
    }

    /// Tier ceilings in force.
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Reserves one unit for `tenant`, renewing an ended period first.
    ///
    /// Never errors; denials carry their reason. Use
    /// [`QuotaDecision::into_result`] to obtain a `LimitError`.
    pub async fn check_and_reserve(&self, tenant: &TenantId) -> QuotaDecision {
        let now = Timestamp::now();

        let outcome = match self.store.reserve(tenant, &self.policy, now).await {
            Ok(Reservation::PeriodEnded(previous)) => self.renew_and_reserve(previous, now).await,
            other => other,
        };

        match outcome {
            Ok(reservation) => {
                self.clear_outage();
                self.decide(tenant, reservation)
            }
            Err(e) => self.on_store_failure(tenant, e),
        }
    }

    /// Like [`check_and_reserve`](Self::check_and_reserve), returning denials as errors.
    pub async fn reserve(&self, tenant: &TenantId) -> Result<QuotaDecision, LimitError> {
        self.check_and_reserve(tenant).await.into_result()
    }

    /// Current usage without reserving. `None` when the tenant has no record.
    pub async fn usage(&self, tenant: &TenantId) -> Result<Option<QuotaDecision>, LimitError> {
        let record = self.store.active(tenant).await.map_err(store_error)?;
        Ok(record.map(|record| {
            let limit = self.policy.limit_for(record.tier);
            QuotaDecision::from_record(&record, limit, record.requests_used < limit)
        }))
    }

    /// Starts a new period for `tenant`, superseding the active record.
    ///
    /// Called on subscription activation, renewal or tier change. Defaults to
    /// the calendar month containing now.
    pub async fn activate(
        &self,
        tenant: &TenantId,
        tier: SubscriptionTier,
        period: Option<BillingPeriod>,
    ) -> Result<QuotaRecord, LimitError> {
        let period = period.unwrap_or_else(|| BillingPeriod::calendar_month(Timestamp::now()));
        let record = self
            .store
            .activate(tenant, tier, period)
            .await
            .map_err(store_error)?;

        info!(
            tenant = %tenant,
            tier = %tier,
            period_end = %record.period.end,
            "quota period activated"
        );
        Ok(record)
    }

    /// All records for `tenant`, newest period first.
    pub async fn history(&self, tenant: &TenantId) -> Result<Vec<QuotaRecord>, LimitError> {
        self.store.history(tenant).await.map_err(store_error)
    }

    async fn renew_and_reserve(
        &self,
        previous: QuotaRecord,
        now: Timestamp,
    ) -> Result<Reservation, QuotaStoreError> {
        let mut period = previous.period.next();
        if period.has_ended(now) {
            period = BillingPeriod::calendar_month(now);
        }

        let renewed = self.store.renew(&previous, period).await?;
        info!(
            tenant = %previous.tenant_id,
            tier = %renewed.tier,
            period_end = %renewed.period.end,
            "quota period rolled over"
        );

        self.store.reserve(&previous.tenant_id, &self.policy, now).await
    }

    fn decide(&self, tenant: &TenantId, reservation: Reservation) -> QuotaDecision {
        match reservation {
            Reservation::Reserved(record) => {
                let limit = self.policy.limit_for(record.tier);
                debug!(
                    tenant = %tenant,
                    used = record.requests_used,
                    limit,
                    "quota reserved"
                );
                QuotaDecision::from_record(&record, limit, true)
            }
            Reservation::Exhausted(record) => {
                let limit = self.policy.limit_for(record.tier);
                info!(
                    tenant = %tenant,
                    used = record.requests_used,
                    limit,
                    period_end = %record.period.end,
                    "quota exhausted"
                );
                QuotaDecision::from_record(&record, limit, false)
            }
            Reservation::NoActiveRecord => {
                warn!(tenant = %tenant, "quota check for tenant without active subscription");
                QuotaDecision::denied(tenant.clone(), QuotaDenial::NoActiveSubscription)
            }
            Reservation::PeriodEnded(record) => {
                error!(
                    tenant = %tenant,
                    period_end = %record.period.end,
                    "quota period still ended after renewal"
                );
                QuotaDecision::denied(
                    tenant.clone(),
                    QuotaDenial::StoreUnavailable {
                        reason: "quota period could not be renewed".to_string(),
                    },
                )
            }
        }
    }

    fn on_store_failure(&self, tenant: &TenantId, e: QuotaStoreError) -> QuotaDecision {
        let outage = self.outage_elapsed();

        if !self.outage_grace.is_zero() && outage < self.outage_grace {
            warn!(
                tenant = %tenant,
                error = %e,
                outage_ms = outage.as_millis() as u64,
                "quota store unavailable, admitting unmetered within grace"
            );
            return QuotaDecision::degraded(tenant.clone());
        }

        error!(
            tenant = %tenant,
            error = %e,
            outage_ms = outage.as_millis() as u64,
            "CRITICAL: quota store unavailable, failing closed"
        );
        QuotaDecision::denied(
            tenant.clone(),
            QuotaDenial::StoreUnavailable {
                reason: e.to_string(),
            },
        )
    }

    /// Marks the outage start on first failure and returns its length.
    fn outage_elapsed(&self) -> Duration {
        let now = Instant::now();
        let Ok(mut since) = self.outage_since.lock() else {
            return Duration::MAX;
        };
        now.saturating_duration_since(*since.get_or_insert(now))
    }

    fn clear_outage(&self) {
        if let Ok(mut since) = self.outage_since.lock() {
            if since.take().is_some() {
                info!("quota store recovered");
            }
        }
    }
}

impl std::fmt::Debug for QuotaTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaTracker")
            .field("policy", &self.policy)
            .field("outage_grace", &self.outage_grace)
            .finish_non_exhaustive()
    }
}

fn store_error(e: QuotaStoreError) -> LimitError {
    LimitError::store_unavailable("quota", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::quota::InMemoryQuotaStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    // ════════════════════════════════════════════════════════════════════════════
    // Test Fixtures
    // ════════════════════════════════════════════════════════════════════════════

    /// Delegates to an in-memory store until switched off.
    struct FlakyQuotaStore {
        inner: InMemoryQuotaStore,
        down: AtomicBool,
    }

    impl FlakyQuotaStore {
        fn new() -> Self {
            Self {
                inner: InMemoryQuotaStore::new(),
                down: AtomicBool::new(false),
            }
        }

        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), QuotaStoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(QuotaStoreError::Unavailable("pool timed out".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl QuotaStore for FlakyQuotaStore {
        async fn reserve(
            &self,
            tenant: &TenantId,
            policy: &QuotaPolicy,
            now: Timestamp,
        ) -> Result<Reservation, QuotaStoreError> {
            self.check()?;
            self.inner.reserve(tenant, policy, now).await
        }

        async fn active(&self, tenant: &TenantId) -> Result<Option<QuotaRecord>, QuotaStoreError> {
            self.check()?;
            self.inner.active(tenant).await
        }

        async fn activate(
            &self,
            tenant: &TenantId,
            tier: SubscriptionTier,
            period: BillingPeriod,
        ) -> Result<QuotaRecord, QuotaStoreError> {
            self.check()?;
            self.inner.activate(tenant, tier, period).await
        }

        async fn renew(
            &self,
            previous: &QuotaRecord,
            period: BillingPeriod,
        ) -> Result<QuotaRecord, QuotaStoreError> {
            self.check()?;
            self.inner.renew(previous, period).await
        }

        async fn history(&self, tenant: &TenantId) -> Result<Vec<QuotaRecord>, QuotaStoreError> {
            self.check()?;
            self.inner.history(tenant).await
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("tenant-q").unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // check_and_reserve
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn reserves_until_tier_ceiling() {
        let tracker = QuotaTracker::new(
            Arc::new(InMemoryQuotaStore::new()),
            QuotaPolicy::new(3, 10),
        );
        tracker
            .activate(&tenant(), SubscriptionTier::Basic, None)
            .await
            .unwrap();

        for used in 1..=3 {
            let decision = tracker.check_and_reserve(&tenant()).await;
            assert!(decision.allowed);
            assert_eq!(decision.used, used);
            assert_eq!(decision.limit, 3);
        }

        let denied = tracker.check_and_reserve(&tenant()).await;
        assert!(!denied.allowed);
        assert_eq!(denied.denial, Some(QuotaDenial::Exhausted));
        assert!(matches!(
            denied.into_result(),
            Err(LimitError::QuotaExceeded { used: 3, limit: 3, .. })
        ));
    }

    #[tokio::test]
    async fn tenant_without_record_is_denied() {
        let tracker = QuotaTracker::new(Arc::new(InMemoryQuotaStore::new()), QuotaPolicy::default());
        let result = tracker.reserve(&tenant()).await;
        assert!(matches!(result, Err(LimitError::NoActiveSubscription(_))));
    }

    #[tokio::test]
    async fn ended_period_rolls_over_with_same_tier() {
        let store = Arc::new(InMemoryQuotaStore::new());
        let this_month = Timestamp::now().start_of_month();
        let last_month = Timestamp::from_datetime(*this_month.as_datetime() - chrono::Duration::days(31));
        let stale_period = BillingPeriod::new(last_month, this_month).unwrap();
        let mut stale = QuotaRecord::new(tenant(), SubscriptionTier::Pro, stale_period);
        stale.requests_used = 10_000;
        store.insert(stale.clone()).await;

        let tracker = QuotaTracker::new(store.clone(), QuotaPolicy::default());
        let decision = tracker.check_and_reserve(&tenant()).await;

        assert!(decision.allowed);
        assert_eq!(decision.used, 1);
        assert_eq!(decision.tier, Some(SubscriptionTier::Pro));

        let history = tracker.history(&tenant()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|r| r.id == stale.id && !r.is_active()));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Fail-closed behavior
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = Arc::new(FlakyQuotaStore::new());
        let tracker = QuotaTracker::new(store.clone(), QuotaPolicy::default());
        tracker
            .activate(&tenant(), SubscriptionTier::Basic, None)
            .await
            .unwrap();

        store.set_down(true);
        let decision = tracker.check_and_reserve(&tenant()).await;
        assert!(!decision.allowed);
        assert!(matches!(
            decision.denial,
            Some(QuotaDenial::StoreUnavailable { .. })
        ));
        assert!(matches!(
            tracker.reserve(&tenant()).await,
            Err(LimitError::CoordinationStoreUnavailable { store: "quota", .. })
        ));

        store.set_down(false);
        assert!(tracker.check_and_reserve(&tenant()).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_grace_admits_then_closes() {
        let store = Arc::new(FlakyQuotaStore::new());
        let tracker = QuotaTracker::new(store.clone(), QuotaPolicy::default())
            .with_outage_grace(Duration::from_secs(30));

        store.set_down(true);
        let first = tracker.check_and_reserve(&tenant()).await;
        assert!(first.allowed);
        assert!(first.degraded);

        tokio::time::advance(Duration::from_secs(31)).await;
        let later = tracker.check_and_reserve(&tenant()).await;
        assert!(!later.allowed);
        assert!(!later.degraded);
    }

    #[tokio::test]
    async fn usage_does_not_reserve() {
        let tracker = QuotaTracker::new(Arc::new(InMemoryQuotaStore::new()), QuotaPolicy::default());
        assert!(tracker.usage(&tenant()).await.unwrap().is_none());

        tracker
            .activate(&tenant(), SubscriptionTier::Pro, None)
            .await
            .unwrap();
        tracker.check_and_reserve(&tenant()).await;

        for _ in 0..3 {
            let usage = tracker.usage(&tenant()).await.unwrap().unwrap();
            assert_eq!(usage.used, 1);
            assert_eq!(usage.limit, 10_000);
            assert_eq!(usage.remaining(), 9_999);
        }
    }

    #[tokio::test]
    async fn concurrent_reservations_admit_exactly_remaining() {
        let tracker = Arc::new(QuotaTracker::new(
            Arc::new(InMemoryQuotaStore::new()),
            QuotaPolicy::new(10, 100),
        ));
        tracker
            .activate(&tenant(), SubscriptionTier::Basic, None)
            .await
            .unwrap();

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.check_and_reserve(&tenant()).await.allowed })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
