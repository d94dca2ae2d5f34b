//! UpstreamSync - folds provider rate-limit metadata into local accounting.
//!
//! Providers are authoritative. When one reports fewer remaining calls than
//! the local window implies (shared credential, clock skew, calls made
//! elsewhere), a ceiling is installed on the local key until the provider's
//! reset. The adjustment is a one-way ratchet: it never loosens local limits.

use std::sync::Arc;

use http::HeaderMap;
use tracing::{debug, info, warn};

use crate::domain::foundation::Timestamp;
use crate::domain::rate_limit::{CallerId, ProviderRateLimit, UpstreamCeiling};

use super::RateLimitCoordinator;

/// Provider remaining counts below this are logged at `warn!`.
pub const LOW_REMAINING_THRESHOLD: u32 = 10;

/// What reconciling one provider response did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The response carried no usable rate-limit metadata.
    NoMetadata,
    /// Local accounting is at least as strict as the provider's.
    InSync,
    /// A ceiling was installed on the local key.
    Tightened(UpstreamCeiling),
    /// An equal or tighter ceiling was already active.
    AlreadyTighter,
    /// The coordination store could not be reached; nothing changed.
    StoreUnavailable,
}

/// Reconciles provider responses against the coordinator's view.
#[derive(Debug, Clone)]
pub struct UpstreamSync {
    coordinator: Arc<RateLimitCoordinator>,
}

impl UpstreamSync {
    pub fn new(coordinator: Arc<RateLimitCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Parses provider headers and reconciles them.
    ///
    /// Returns the parsed metadata alongside the outcome so callers can
    /// reuse `retry_after`.
    pub async fn reconcile_headers(
        &self,
        service: &str,
        caller: &CallerId,
        headers: &HeaderMap,
    ) -> (SyncOutcome, Option<ProviderRateLimit>) {
        match ProviderRateLimit::from_headers(headers, Timestamp::now()) {
            Some(provider) => {
                let outcome = self.reconcile(service, caller, &provider).await;
                (outcome, Some(provider))
            }
            None => (SyncOutcome::NoMetadata, None),
        }
    }

    /// Installs a ceiling when the provider is stricter than local state.
    ///
    /// Store failures are logged and ignored; the next response will try again.
    pub async fn reconcile(
        &self,
        service: &str,
        caller: &CallerId,
        provider: &ProviderRateLimit,
    ) -> SyncOutcome {
        let now = Timestamp::now();

        if let Some(remaining) = provider.remaining {
            if remaining < LOW_REMAINING_THRESHOLD {
                warn!(
                    service = %service,
                    caller = %caller.redacted(),
                    remaining,
                    limit = ?provider.limit,
                    reset_at = ?provider.reset_at,
                    "provider rate limit nearly exhausted"
                );
            }
        }

        let Some(ceiling) = provider.ceiling(now) else {
            return SyncOutcome::NoMetadata;
        };

        let local = match self.coordinator.status(service, caller).await {
            Ok(local) => local,
            Err(e) => {
                warn!(service = %service, error = %e, "upstream sync skipped");
                return SyncOutcome::StoreUnavailable;
            }
        };

        if ceiling.remaining >= local.remaining {
            debug!(
                service = %service,
                provider_remaining = ceiling.remaining,
                local_remaining = local.remaining,
                "provider in sync"
            );
            return SyncOutcome::InSync;
        }

        match self.coordinator.tighten(service, caller, ceiling).await {
            Ok(true) => {
                info!(
                    service = %service,
                    caller = %caller.redacted(),
                    provider_remaining = ceiling.remaining,
                    local_remaining = local.remaining,
                    reset_at = %ceiling.reset_at,
                    "local limit tightened to provider ceiling"
                );
                SyncOutcome::Tightened(ceiling)
            }
            Ok(false) => SyncOutcome::AlreadyTighter,
            Err(e) => {
                warn!(service = %service, error = %e, "upstream sync skipped");
                SyncOutcome::StoreUnavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rate_limiter::InMemorySlidingWindow;
    use crate::domain::foundation::CredentialId;
    use crate::domain::rate_limit::{ServiceLimit, ServiceRegistry};
    use http::HeaderValue;

    fn sync_with(limit: ServiceLimit) -> (UpstreamSync, Arc<RateLimitCoordinator>) {
        let registry = Arc::new(ServiceRegistry::new(vec![limit]).unwrap());
        let coordinator = Arc::new(RateLimitCoordinator::new(
            registry,
            Arc::new(InMemorySlidingWindow::default()),
        ));
        (UpstreamSync::new(coordinator.clone()), coordinator)
    }

    fn credential() -> CallerId {
        CallerId::credential(CredentialId::new("shared-key").unwrap())
    }

    fn provider(remaining: u32, reset_in_secs: u64) -> ProviderRateLimit {
        ProviderRateLimit {
            limit: Some(900),
            remaining: Some(remaining),
            reset_at: Some(Timestamp::now().plus_secs(reset_in_secs)),
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn lower_provider_remaining_installs_ceiling() {
        let (sync, coordinator) = sync_with(ServiceLimit::new("social-user-lookup", 900, 900).unwrap());
        let caller = credential();

        let outcome = sync
            .reconcile("social-user-lookup", &caller, &provider(2, 300))
            .await;
        assert!(matches!(outcome, SyncOutcome::Tightened(c) if c.remaining == 2));

        assert!(coordinator.check("social-user-lookup", &caller).await.unwrap().allowed);
        assert!(coordinator.check("social-user-lookup", &caller).await.unwrap().allowed);
        let denied = coordinator.check("social-user-lookup", &caller).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.upstream_capped);
    }

    #[tokio::test]
    async fn higher_provider_remaining_never_loosens() {
        let (sync, coordinator) = sync_with(ServiceLimit::new("model-inference", 5, 60).unwrap());
        let caller = credential();
        for _ in 0..5 {
            coordinator.check("model-inference", &caller).await.unwrap();
        }

        let outcome = sync
            .reconcile("model-inference", &caller, &provider(40, 30))
            .await;
        assert_eq!(outcome, SyncOutcome::InSync);
        assert!(!coordinator.check("model-inference", &caller).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn ratchet_keeps_existing_lower_ceiling() {
        let (sync, _) = sync_with(ServiceLimit::new("social-tweet-lookup", 300, 900).unwrap());
        let caller = credential();

        sync.reconcile("social-tweet-lookup", &caller, &provider(3, 300))
            .await;
        let outcome = sync
            .reconcile("social-tweet-lookup", &caller, &provider(50, 300))
            .await;

        // Local remaining is already 3, so the looser report is in sync.
        assert_eq!(outcome, SyncOutcome::InSync);
    }

    #[tokio::test]
    async fn metadata_without_reset_is_ignored() {
        let (sync, _) = sync_with(ServiceLimit::new("model-inference", 50, 60).unwrap());
        let provider = ProviderRateLimit {
            remaining: Some(0),
            ..ProviderRateLimit::default()
        };

        let outcome = sync.reconcile("model-inference", &credential(), &provider).await;
        assert_eq!(outcome, SyncOutcome::NoMetadata);
    }

    #[tokio::test]
    async fn headers_are_parsed_and_reconciled() {
        let (sync, _) = sync_with(ServiceLimit::new("social-user-timeline", 900, 900).unwrap());
        let reset = Timestamp::now().plus_secs(120).as_unix_secs().to_string();

        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-limit", HeaderValue::from_static("900"));
        headers.insert("x-rate-limit-remaining", HeaderValue::from_static("4"));
        headers.insert("x-rate-limit-reset", HeaderValue::from_str(&reset).unwrap());

        let (outcome, parsed) = sync
            .reconcile_headers("social-user-timeline", &credential(), &headers)
            .await;
        assert!(matches!(outcome, SyncOutcome::Tightened(c) if c.remaining == 4));
        assert_eq!(parsed.unwrap().limit, Some(900));

        let (outcome, parsed) = sync
            .reconcile_headers("social-user-timeline", &credential(), &HeaderMap::new())
            .await;
        assert_eq!(outcome, SyncOutcome::NoMetadata);
        assert!(parsed.is_none());
    }
}
