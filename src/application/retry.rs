//! RetryController - jittered exponential backoff for rate-limited calls.
//!
//! Waits are `tokio::time::sleep` suspensions; no thread is blocked, and
//! dropping the future returned by [`RetryController::run`] cancels a pending
//! wait.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::domain::rate_limit::{LimitError, LimitTier};

/// Largest jitter fraction a policy may apply.
pub const MAX_JITTER: f64 = 0.2;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, doubled per attempt.
    pub base_delay: Duration,
    /// Longest single wait the controller accepts before giving up.
    pub max_delay: Duration,
    /// Symmetric jitter fraction, at most [`MAX_JITTER`].
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

/// A call rejected for rate-limit reasons.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitRejection {
    pub service: String,
    pub tier: LimitTier,
    pub limit: u32,
    /// Wait computed by the local coordinator.
    pub local_retry_after: Option<Duration>,
    /// Wait the provider asked for (`retry-after`).
    pub provider_retry_after: Option<Duration>,
}

impl RateLimitRejection {
    /// Final error. Reports the longest wait known, not the last backoff.
    fn into_error(self, wait: Duration) -> LimitError {
        let known = self
            .local_retry_after
            .max(self.provider_retry_after)
            .unwrap_or_default();
        LimitError::RateLimitExceeded {
            service: self.service,
            tier: self.tier,
            limit: self.limit,
            retry_after: wait.max(known),
        }
    }
}

/// Failure of one attempt, as seen by the controller.
#[derive(Debug)]
pub enum CallError<E> {
    /// Rate limited locally or by the provider. Retried.
    RateLimited(RateLimitRejection),
    /// Anything else. Returned unchanged.
    Failed(E),
}

/// Final failure after retries.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Retries were exhausted or the required wait was too long.
    #[error(transparent)]
    Limit(#[from] LimitError),

    /// The call failed for a reason other than rate limiting.
    #[error("{0}")]
    Call(E),
}

/// Per-call retry bookkeeping. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub cumulative_delay: Duration,
    pub last_retry_after: Option<Duration>,
}

/// Runs calls under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Wait before retry number `attempt + 1`.
    ///
    /// `min(base * 2^attempt, local retry-after)` with jitter, then raised to
    /// the provider's retry-after when one was given.
    pub fn delay_for(&self, attempt: u32, rejection: &RateLimitRejection) -> Duration {
        let exponential = self
            .policy
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let backoff = match rejection.local_retry_after {
            Some(local) => exponential.min(local),
            None => exponential,
        };
        let jittered = apply_jitter(backoff, self.policy.jitter);

        match rejection.provider_retry_after {
            Some(provider) => jittered.max(provider),
            None => jittered,
        }
    }

    /// Calls `call` until it succeeds, fails for another reason, or the
    /// retry budget runs out. The closure receives the attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut call: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError<E>>>,
    {
        let mut state = RetryState::default();

        loop {
            let rejection = match call(state.attempt).await {
                Ok(value) => return Ok(value),
                Err(CallError::Failed(e)) => return Err(RetryError::Call(e)),
                Err(CallError::RateLimited(rejection)) => rejection,
            };

            let wait = self.delay_for(state.attempt, &rejection);
            state.last_retry_after = Some(wait);

            if state.attempt >= self.policy.max_retries {
                warn!(
                    service = %rejection.service,
                    attempts = state.attempt + 1,
                    waited_ms = state.cumulative_delay.as_millis() as u64,
                    "rate limit retries exhausted"
                );
                return Err(rejection.into_error(wait).into());
            }
            if wait > self.policy.max_delay {
                warn!(
                    service = %rejection.service,
                    wait_ms = wait.as_millis() as u64,
                    max_delay_ms = self.policy.max_delay.as_millis() as u64,
                    "required wait exceeds max delay, giving up"
                );
                return Err(rejection.into_error(wait).into());
            }

            info!(
                service = %rejection.service,
                attempt = state.attempt + 1,
                wait_ms = wait.as_millis() as u64,
                provider_retry_after = ?rejection.provider_retry_after,
                "rate limited, backing off"
            );
            tokio::time::sleep(wait).await;
            state.attempt += 1;
            state.cumulative_delay += wait;
        }
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(MAX_JITTER);
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
