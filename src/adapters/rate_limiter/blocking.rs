//! Synchronous facade over the async coordinator.
//!
//! Background task code that cannot `.await` shares the coordinator, sync
//! adapter and retry policy of the async path through this type. Calls block
//! the current thread on an owned current-thread runtime, so they must not be
//! made from inside an async context.

use std::cell::RefCell;
use std::future::ready;
use std::io;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::application::{
    CallError, RateLimitCoordinator, RateLimitRejection, RetryController, RetryError,
    SyncOutcome, UpstreamSync,
};
use crate::domain::rate_limit::{CallerId, LimitError, ProviderRateLimit, RateLimitDecision};

/// Blocking access to one shared limit table and retry policy.
pub struct BlockingLimiter {
    runtime: Runtime,
    coordinator: Arc<RateLimitCoordinator>,
    sync: UpstreamSync,
    retry: RetryController,
}

impl BlockingLimiter {
    pub fn new(coordinator: Arc<RateLimitCoordinator>, retry: RetryController) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let sync = UpstreamSync::new(coordinator.clone());
        Ok(Self {
            runtime,
            coordinator,
            sync,
            retry,
        })
    }

    /// See [`RateLimitCoordinator::check`].
    pub fn check(&self, service: &str, caller: &CallerId) -> Result<RateLimitDecision, LimitError> {
        self.runtime.block_on(self.coordinator.check(service, caller))
    }

    /// See [`RateLimitCoordinator::status`].
    pub fn status(&self, service: &str, caller: &CallerId) -> Result<RateLimitDecision, LimitError> {
        self.runtime.block_on(self.coordinator.status(service, caller))
    }

    /// See [`UpstreamSync::reconcile`].
    pub fn reconcile(
        &self,
        service: &str,
        caller: &CallerId,
        provider: &ProviderRateLimit,
    ) -> SyncOutcome {
        self.runtime
            .block_on(self.sync.reconcile(service, caller, provider))
    }

    /// Runs a synchronous call under the retry policy. Backoff waits block.
    pub fn run<T, E, F>(&self, mut call: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, CallError<E>>,
    {
        self.runtime
            .block_on(self.retry.run(|attempt| ready(call(attempt))))
    }

    /// Checks `service` for `caller`, then runs `call` under the retry policy.
    ///
    /// Each attempt is admitted by the coordinator first; a local denial is
    /// retried like a provider rejection.
    pub fn call<T, E, F>(&self, service: &str, caller: &CallerId, call: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, CallError<E>>,
    {
        self.coordinator.registry().resolve(service)?;
        let call = RefCell::new(call);
        let coordinator = &self.coordinator;

        self.runtime.block_on(self.retry.run(|attempt| {
            let call = &call;
            async move {
                // Resolution succeeded above, so check cannot fail.
                if let Ok(decision) = coordinator.check(service, caller).await {
                    if !decision.allowed {
                        return Err(CallError::RateLimited(RateLimitRejection {
                            service: decision.service,
                            tier: decision.tier,
                            limit: decision.limit,
                            local_retry_after: Some(decision.retry_after),
                            provider_retry_after: None,
                        }));
                    }
                }
                let mut call = call.borrow_mut();
                (*call)(attempt)
            }
        }))
    }
}

impl std::fmt::Debug for BlockingLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingLimiter")
            .field("retry", self.retry.policy())
            .finish_non_exhaustive()
    }
}
