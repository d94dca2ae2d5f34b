//! RateLimitCoordinator - sliding-window admission for named services.
//!
//! The coordinator fails open: when the coordination store cannot be reached
//! the call is admitted and flagged `degraded`, so a store outage costs
//! bounded over-admission instead of taking the platform down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::domain::foundation::Timestamp;
use crate::domain::rate_limit::{
    CallerId, LimitError, LimitTier, RateLimitDecision, RateLimitKey, ServiceLimit,
    ServiceRegistry, UpstreamCeiling,
};
use crate::ports::{SlidingWindowStore, StoreError, WindowAdmission, WindowUsage};

/// Longest a single store call may take before it counts as a failure.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Admits or denies calls against the registry's limits.
pub struct RateLimitCoordinator {
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn SlidingWindowStore>,
    store_timeout: Duration,
}

impl RateLimitCoordinator {
    pub fn new(registry: Arc<ServiceRegistry>, store: Arc<dyn SlidingWindowStore>) -> Self {
        Self {
            registry,
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bounds every store call; a call that overruns fails open like any
    /// other store error.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The registry snapshot this coordinator enforces.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Records one call for `caller` against `service` if capacity allows.
    ///
    /// Unregistered services are enforced against the most conservative
    /// registered limit. Only an empty registry returns `UnknownService`.
    pub async fn check(
        &self,
        service: &str,
        caller: &CallerId,
    ) -> Result<RateLimitDecision, LimitError> {
        let limit = self.resolve(service)?;
        Ok(self.check_limit(service, &limit, caller).await)
    }

    /// Checks several services for one caller, shortest window first.
    ///
    /// Stops at the first denial, which is then the last element. Slots
    /// consumed by earlier admissions in the same call are not returned.
    pub async fn check_all<S: AsRef<str>>(
        &self,
        services: &[S],
        caller: &CallerId,
    ) -> Result<Vec<RateLimitDecision>, LimitError> {
        let mut limits = Vec::with_capacity(services.len());
        for service in services {
            let service = service.as_ref();
            limits.push((service, self.resolve(service)?));
        }
        limits.sort_by_key(|(_, limit)| limit.window_secs);

        let mut decisions = Vec::with_capacity(limits.len());
        for (service, limit) in limits {
            let decision = self.check_limit(service, &limit, caller).await;
            let denied = !decision.allowed;
            decisions.push(decision);
            if denied {
                break;
            }
        }
        Ok(decisions)
    }

    /// Current usage without consuming a slot.
    pub async fn status(
        &self,
        service: &str,
        caller: &CallerId,
    ) -> Result<RateLimitDecision, LimitError> {
        let limit = self.resolve(service)?;
        let key = RateLimitKey::new(service, caller.clone());

        let usage = self
            .bounded(self.store.usage(&key, limit.window()))
            .await
            .map_err(|e| LimitError::store_unavailable("coordination", e.to_string()))?;

        Ok(status_decision(service, &limit, &usage))
    }

    /// Clears the window and upstream ceiling for one key.
    pub async fn reset(&self, service: &str, caller: &CallerId) -> Result<(), LimitError> {
        let key = RateLimitKey::new(service, caller.clone());
        self.bounded(self.store.reset(&key))
            .await
            .map_err(|e| LimitError::store_unavailable("coordination", e.to_string()))?;
        info!(key = %key, "rate limit window reset");
        Ok(())
    }

    /// Installs a provider-derived ceiling, capped at the service window.
    ///
    /// Returns true when the stored ceiling changed.
    pub async fn tighten(
        &self,
        service: &str,
        caller: &CallerId,
        ceiling: UpstreamCeiling,
    ) -> Result<bool, LimitError> {
        let limit = self.resolve(service)?;
        let key = RateLimitKey::new(service, caller.clone());
        let capped = ceiling.capped_at(Timestamp::now().plus(limit.window()));

        self.bounded(self.store.tighten(&key, capped))
            .await
            .map_err(|e| LimitError::store_unavailable("coordination", e.to_string()))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "no reply within {}ms",
                    self.store_timeout.as_millis()
                ))
            })?
    }

    fn resolve(&self, service: &str) -> Result<Arc<ServiceLimit>, LimitError> {
        let resolved = self.registry.resolve(service)?;
        if resolved.fallback {
            error!(
                service = %service,
                applied = %resolved.limit.name,
                max_requests = resolved.limit.max_requests,
                window_secs = resolved.limit.window_secs,
                "unregistered service, enforcing most conservative limit"
            );
        }
        Ok(resolved.limit)
    }

    async fn check_limit(
        &self,
        service: &str,
        limit: &ServiceLimit,
        caller: &CallerId,
    ) -> RateLimitDecision {
        let key = RateLimitKey::new(service, caller.clone());

        match self
            .bounded(self.store.admit(&key, limit.max_requests, limit.window()))
            .await
        {
            Ok(admission) => {
                let mut decision = admission_decision(service, limit, &admission);
                if decision.allowed {
                    debug!(
                        key = %key,
                        usage = decision.usage,
                        limit = decision.limit,
                        "admitted"
                    );
                } else if !limit.enforce {
                    info!(
                        key = %key,
                        usage = decision.usage,
                        limit = decision.limit,
                        retry_after_ms = decision.retry_after.as_millis() as u64,
                        "shadow mode: would have denied"
                    );
                    decision.allowed = true;
                    decision.retry_after = Duration::ZERO;
                } else {
                    debug!(
                        key = %key,
                        retry_after_ms = decision.retry_after.as_millis() as u64,
                        upstream_capped = decision.upstream_capped,
                        "denied"
                    );
                }
                decision
            }
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "coordination store unavailable, failing open"
                );
                RateLimitDecision::degraded(service, limit.max_requests, limit.window_secs)
            }
        }
    }
}

impl std::fmt::Debug for RateLimitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitCoordinator")
            .field("services", &self.registry.names())
            .finish_non_exhaustive()
    }
}

/// Picks the admitted decision with the least headroom.
///
/// Used to fill response headers after `check_all`.
pub fn most_constraining(decisions: &[RateLimitDecision]) -> Option<&RateLimitDecision> {
    if let Some(denied) = decisions.iter().find(|d| !d.allowed) {
        return Some(denied);
    }
    decisions.iter().min_by_key(|d| d.remaining)
}

fn admission_decision(
    service: &str,
    limit: &ServiceLimit,
    admission: &WindowAdmission,
) -> RateLimitDecision {
    let mut remaining = limit.max_requests.saturating_sub(admission.count);
    if let Some(ceiling) = admission.ceiling_remaining {
        remaining = remaining.min(ceiling);
    }
    let reset_at = if admission.allowed {
        admission.now.plus(limit.window())
    } else {
        admission.now.plus(admission.retry_after)
    };

    RateLimitDecision {
        service: service.to_string(),
        tier: LimitTier::for_window(limit.window_secs),
        allowed: admission.allowed,
        retry_after: admission.retry_after,
        usage: admission.count,
        limit: limit.max_requests,
        remaining: if admission.allowed { remaining } else { 0 },
        reset_at,
        degraded: false,
        upstream_capped: admission.ceiling_remaining.is_some(),
    }
}

fn status_decision(service: &str, limit: &ServiceLimit, usage: &WindowUsage) -> RateLimitDecision {
    let mut remaining = limit.max_requests.saturating_sub(usage.count);
    let mut retry_after = Duration::ZERO;

    if remaining == 0 {
        if let Some(oldest) = usage.oldest {
            retry_after = oldest.plus(limit.window()).saturating_until(&usage.now);
        }
    }
    if let Some(ceiling) = usage.ceiling {
        remaining = remaining.min(ceiling.remaining);
        if ceiling.remaining == 0 {
            retry_after = retry_after.max(ceiling.ttl(usage.now));
        }
    }

    let reset_at = match usage.oldest {
        Some(oldest) => oldest.plus(limit.window()),
        None => usage.now,
    };

    RateLimitDecision {
        service: service.to_string(),
        tier: LimitTier::for_window(limit.window_secs),
        allowed: remaining > 0,
        retry_after,
        usage: usage.count,
        limit: limit.max_requests,
        remaining,
        reset_at,
        degraded: false,
        upstream_capped: usage.ceiling.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rate_limiter::InMemorySlidingWindow;
    use crate::domain::foundation::TenantId;
    use async_trait::async_trait;

    // ════════════════════════════════════════════════════════════════════════════
    // Test Fixtures
    // ════════════════════════════════════════════════════════════════════════════

    struct UnreachableStore;

    #[async_trait]
    impl SlidingWindowStore for UnreachableStore {
        async fn admit(
            &self,
            _key: &RateLimitKey,
            _max_requests: u32,
            _window: Duration,
        ) -> Result<WindowAdmission, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn usage(
            &self,
            _key: &RateLimitKey,
            _window: Duration,
        ) -> Result<WindowUsage, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn tighten(
            &self,
            _key: &RateLimitKey,
            _ceiling: UpstreamCeiling,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn reset(&self, _key: &RateLimitKey) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    /// Accepts the call and never replies.
    struct HungStore;

    #[async_trait]
    impl SlidingWindowStore for HungStore {
        async fn admit(
            &self,
            _key: &RateLimitKey,
            _max_requests: u32,
            _window: Duration,
        ) -> Result<WindowAdmission, StoreError> {
            std::future::pending().await
        }

        async fn usage(
            &self,
            _key: &RateLimitKey,
            _window: Duration,
        ) -> Result<WindowUsage, StoreError> {
            std::future::pending().await
        }

        async fn tighten(
            &self,
            _key: &RateLimitKey,
            _ceiling: UpstreamCeiling,
        ) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn reset(&self, _key: &RateLimitKey) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    fn registry(limits: Vec<ServiceLimit>) -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry::new(limits).unwrap())
    }

    fn coordinator(limits: Vec<ServiceLimit>) -> RateLimitCoordinator {
        RateLimitCoordinator::new(
            registry(limits),
            Arc::new(InMemorySlidingWindow::default()),
        )
    }

    fn tenant(id: &str) -> CallerId {
        CallerId::tenant(TenantId::new(id).unwrap())
    }

    fn limit(name: &str, max: u32, window: u32) -> ServiceLimit {
        ServiceLimit::new(name, max, window).unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // check
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test(start_paused = true)]
    async fn admits_exactly_max_requests_then_denies() {
        let coordinator = coordinator(vec![limit("api-minute", 3, 60)]);
        let caller = tenant("t-1");

        for expected_remaining in [2, 1, 0] {
            let decision = coordinator.check("api-minute", &caller).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.tier, LimitTier::Minute);
        }

        let denied = coordinator.check("api-minute", &caller).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
        assert_eq!(denied.remaining, 0);
        assert!(matches!(
            denied.into_result(),
            Err(LimitError::RateLimitExceeded { limit: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_retry_after() {
        let coordinator = coordinator(vec![limit("api-minute", 1, 60)]);
        let caller = tenant("t-1");

        coordinator.check("api-minute", &caller).await.unwrap();
        let denied = coordinator.check("api-minute", &caller).await.unwrap();
        assert!(!denied.allowed);

        tokio::time::advance(denied.retry_after).await;
        assert!(coordinator.check("api-minute", &caller).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn store_failure_fails_open_with_degraded_flag() {
        let coordinator = RateLimitCoordinator::new(
            registry(vec![limit("api-minute", 1, 60)]),
            Arc::new(UnreachableStore),
        );

        for _ in 0..5 {
            let decision = coordinator.check("api-minute", &tenant("t-1")).await.unwrap();
            assert!(decision.allowed);
            assert!(decision.degraded);
            assert_eq!(decision.service, "api-minute");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_store_fails_open_after_store_timeout() {
        let coordinator = RateLimitCoordinator::new(
            registry(vec![limit("api-minute", 1, 60)]),
            Arc::new(HungStore),
        )
        .with_store_timeout(Duration::from_millis(250));

        let started = tokio::time::Instant::now();
        let decision = coordinator.check("api-minute", &tenant("t-1")).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(started.elapsed(), Duration::from_millis(250));

        assert!(matches!(
            coordinator.status("api-minute", &tenant("t-1")).await,
            Err(LimitError::CoordinationStoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn shadow_mode_records_but_never_denies() {
        let coordinator = coordinator(vec![limit("api-minute", 1, 60).shadow()]);
        let caller = tenant("t-1");

        for _ in 0..3 {
            let decision = coordinator.check("api-minute", &caller).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.retry_after, Duration::ZERO);
        }

        let status = coordinator.status("api-minute", &caller).await.unwrap();
        assert_eq!(status.usage, 1);
    }

    #[tokio::test]
    async fn unknown_service_uses_conservative_fallback() {
        let coordinator = coordinator(vec![
            limit("generous", 1000, 60),
            limit("strict", 2, 60),
        ]);
        let caller = tenant("t-1");

        assert!(coordinator.check("mystery", &caller).await.unwrap().allowed);
        assert!(coordinator.check("mystery", &caller).await.unwrap().allowed);
        let denied = coordinator.check("mystery", &caller).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 2);
        assert_eq!(denied.service, "mystery");
    }

    #[tokio::test]
    async fn unknown_service_with_empty_registry_is_an_error() {
        let coordinator = coordinator(vec![]);
        let result = coordinator.check("anything", &tenant("t-1")).await;
        assert!(matches!(result, Err(LimitError::UnknownService(name)) if name == "anything"));
    }

    #[tokio::test]
    async fn callers_are_independent() {
        let coordinator = coordinator(vec![limit("api-minute", 1, 60)]);

        assert!(coordinator.check("api-minute", &tenant("a")).await.unwrap().allowed);
        assert!(!coordinator.check("api-minute", &tenant("a")).await.unwrap().allowed);
        assert!(coordinator.check("api-minute", &tenant("b")).await.unwrap().allowed);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // check_all
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn check_all_orders_by_window_and_short_circuits() {
        let coordinator = coordinator(vec![
            limit("api-minute", 1, 60),
            limit("api-hour", 100, 3600),
        ]);
        let caller = tenant("t-1");

        let first = coordinator
            .check_all(&["api-hour", "api-minute"], &caller)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].service, "api-minute");
        assert_eq!(first[1].service, "api-hour");

        let second = coordinator
            .check_all(&["api-hour", "api-minute"], &caller)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert!(!second[0].allowed);

        let hour = coordinator.status("api-hour", &caller).await.unwrap();
        assert_eq!(hour.usage, 1);
    }

    #[test]
    fn most_constraining_prefers_denial_then_least_remaining() {
        let mut a = RateLimitDecision::degraded("a", 10, 60);
        a.remaining = 4;
        let mut b = RateLimitDecision::degraded("b", 10, 3600);
        b.remaining = 2;
        assert_eq!(most_constraining(&[a.clone(), b.clone()]).unwrap().service, "b");

        a.allowed = false;
        assert_eq!(most_constraining(&[a, b]).unwrap().service, "a");
        assert!(most_constraining(&[]).is_none());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // status / reset / tighten
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test(start_paused = true)]
    async fn status_reports_without_consuming() {
        let coordinator = coordinator(vec![limit("api-minute", 2, 60)]);
        let caller = tenant("t-1");

        coordinator.check("api-minute", &caller).await.unwrap();
        for _ in 0..3 {
            let status = coordinator.status("api-minute", &caller).await.unwrap();
            assert_eq!(status.usage, 1);
            assert_eq!(status.remaining, 1);
            assert!(status.allowed);
        }

        coordinator.check("api-minute", &caller).await.unwrap();
        let status = coordinator.status("api-minute", &caller).await.unwrap();
        assert!(!status.allowed);
        assert_eq!(status.retry_after, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn status_surfaces_store_errors() {
        let coordinator = RateLimitCoordinator::new(
            registry(vec![limit("api-minute", 1, 60)]),
            Arc::new(UnreachableStore),
        );
        let result = coordinator.status("api-minute", &tenant("t-1")).await;
        assert!(matches!(
            result,
            Err(LimitError::CoordinationStoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn reset_restores_capacity() {
        let coordinator = coordinator(vec![limit("api-minute", 1, 60)]);
        let caller = tenant("t-1");

        coordinator.check("api-minute", &caller).await.unwrap();
        coordinator.reset("api-minute", &caller).await.unwrap();
        assert!(coordinator.check("api-minute", &caller).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn tighten_caps_ceiling_at_service_window() {
        let coordinator = coordinator(vec![limit("model-inference", 50, 60)]);
        let caller = tenant("t-1");
        let far_future = Timestamp::now().plus_secs(86_400);

        let changed = coordinator
            .tighten(
                "model-inference",
                &caller,
                UpstreamCeiling {
                    remaining: 0,
                    reset_at: far_future,
                },
            )
            .await
            .unwrap();
        assert!(changed);

        let denied = coordinator.check("model-inference", &caller).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.upstream_capped);
        assert!(denied.retry_after <= Duration::from_secs(61));
    }
}
