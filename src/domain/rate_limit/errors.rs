//! Error taxonomy for rate limiting and quota enforcement.

use std::time::Duration;
use thiserror::Error;

use crate::domain::foundation::{TenantId, Timestamp};

use super::decision::ceil_secs;
use super::LimitTier;

/// Errors surfaced by the coordinator, quota tracker and retry controller.
///
/// Every variant maps to a stable machine-readable code so user-visible
/// denials never degrade into a bare "try again".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimitError {
    /// A sliding-window limit denied the call. Retryable after `retry_after`.
    #[error("rate limit exceeded for {service} ({tier}); retry after {}s", ceil_secs(*retry_after))]
    RateLimitExceeded {
        service: String,
        tier: LimitTier,
        limit: u32,
        retry_after: Duration,
    },

    /// The tenant used up its period quota. Waiting within the period does not help.
    #[error("quota exceeded for tenant {tenant}: {used}/{limit} used until {period_end}")]
    QuotaExceeded {
        tenant: TenantId,
        limit: u32,
        used: u32,
        period_end: Timestamp,
    },

    /// The service name is not registered. A configuration defect.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// A backing store could not be reached.
    #[error("{store} store unavailable: {reason}")]
    CoordinationStoreUnavailable { store: &'static str, reason: String },

    /// The tenant has no quota record covering the current period.
    #[error("no active subscription for tenant {0}")]
    NoActiveSubscription(TenantId),
}

impl LimitError {
    /// Creates a store-unavailable error.
    pub fn store_unavailable(store: &'static str, reason: impl Into<String>) -> Self {
        LimitError::CoordinationStoreUnavailable {
            store,
            reason: reason.into(),
        }
    }

    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            LimitError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            LimitError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            LimitError::UnknownService(_) => "UNKNOWN_SERVICE",
            LimitError::CoordinationStoreUnavailable { .. } => "STORE_UNAVAILABLE",
            LimitError::NoActiveSubscription(_) => "NO_ACTIVE_SUBSCRIPTION",
        }
    }

    /// Whether retrying later in the same period can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LimitError::RateLimitExceeded { .. } | LimitError::CoordinationStoreUnavailable { .. }
        )
    }

    /// Suggested wait before retrying, when one is known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LimitError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            LimitError::QuotaExceeded { period_end, .. } => {
                Some(period_end.saturating_until(&Timestamp::now()))
            }
            _ => None,
        }
    }
}
