//! Rate-limited outbound HTTP client.
//!
//! Each attempt runs the full outbound flow: coordinator check, send, fold
//! the provider's rate-limit headers into local accounting, and turn a `429`
//! into a rejection the retry controller understands. Request bodies are the
//! caller's business; this client only sends what it is given.

use std::sync::Arc;

use reqwest::{Client, Request, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::application::{
    CallError, RateLimitCoordinator, RateLimitRejection, RetryController, RetryError, UpstreamSync,
};
use crate::domain::foundation::Timestamp;
use crate::domain::rate_limit::{CallerId, LimitError, ProviderRateLimit};

/// Failures of an outbound call other than rate limiting.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Transport or request-construction failure.
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The request body is a stream and cannot be sent twice.
    #[error("request cannot be retried: body is not replayable")]
    NotReplayable,

    /// The registry could not resolve the service.
    #[error(transparent)]
    Limit(#[from] LimitError),
}

/// A `reqwest::Client` whose calls are metered per service and caller.
#[derive(Clone)]
pub struct TrackedClient {
    client: Client,
    coordinator: Arc<RateLimitCoordinator>,
    sync: UpstreamSync,
    retry: RetryController,
}

impl TrackedClient {
    pub fn new(
        client: Client,
        coordinator: Arc<RateLimitCoordinator>,
        retry: RetryController,
    ) -> Self {
        let sync = UpstreamSync::new(coordinator.clone());
        Self {
            client,
            coordinator,
            sync,
            retry,
        }
    }

    /// The underlying client, for building requests.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Builds and executes `request` against `service`'s limit.
    pub async fn send(
        &self,
        service: &str,
        caller: &CallerId,
        request: RequestBuilder,
    ) -> Result<Response, RetryError<UpstreamError>> {
        let request = request
            .build()
            .map_err(|e| RetryError::Call(UpstreamError::Request(e)))?;
        self.execute(service, caller, request).await
    }

    /// Executes `request` under the retry policy.
    ///
    /// Returns the first non-429 response, whatever its status.
    pub async fn execute(
        &self,
        service: &str,
        caller: &CallerId,
        request: Request,
    ) -> Result<Response, RetryError<UpstreamError>> {
        self.retry
            .run(|attempt| {
                let request = request.try_clone();
                async move {
                    let request = request.ok_or(CallError::Failed(UpstreamError::NotReplayable))?;
                    self.attempt(service, caller, request, attempt).await
                }
            })
            .await
    }

    async fn attempt(
        &self,
        service: &str,
        caller: &CallerId,
        request: Request,
        attempt: u32,
    ) -> Result<Response, CallError<UpstreamError>> {
        let decision = self
            .coordinator
            .check(service, caller)
            .await
            .map_err(|e| CallError::Failed(e.into()))?;

        if !decision.allowed {
            return Err(CallError::RateLimited(RateLimitRejection {
                service: decision.service,
                tier: decision.tier,
                limit: decision.limit,
                local_retry_after: Some(decision.retry_after),
                provider_retry_after: None,
            }));
        }

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| CallError::Failed(e.into()))?;

        let (outcome, provider) = self
            .sync
            .reconcile_headers(service, caller, response.headers())
            .await;
        debug!(
            service = %service,
            attempt,
            status = response.status().as_u16(),
            sync = ?outcome,
            "upstream response"
        );

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }

        let provider_retry_after = provider.as_ref().and_then(provider_wait);
        warn!(
            service = %service,
            caller = %caller.redacted(),
            attempt,
            provider_retry_after = ?provider_retry_after,
            "provider rejected call with 429"
        );

        Err(CallError::RateLimited(RateLimitRejection {
            service: decision.service,
            tier: decision.tier,
            limit: provider
                .and_then(|p| p.limit)
                .unwrap_or(decision.limit),
            local_retry_after: None,
            provider_retry_after,
        }))
    }
}

/// Explicit `retry-after`, else time until the provider's reset.
fn provider_wait(provider: &ProviderRateLimit) -> Option<std::time::Duration> {
    let now = Timestamp::now();
    provider
        .retry_after
        .or_else(|| provider.reset_at.map(|reset| reset.saturating_until(&now)))
}

impl std::fmt::Debug for TrackedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedClient")
            .field("retry", self.retry.policy())
            .finish_non_exhaustive()
    }
}
