//! Admission decisions returned by the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::foundation::Timestamp;

use super::LimitError;

/// Which constraint tier produced a decision.
///
/// Sliding windows are tagged by the coarsest calendar unit they fit in, so a
/// 900-second provider window reports as `Hour`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitTier {
    /// Windows up to one minute.
    Minute,
    /// Windows up to one hour.
    Hour,
    /// Windows longer than one hour.
    Day,
    /// Calendar-period subscription quota.
    Quota,
}

impl LimitTier {
    /// Classifies a sliding window by its length.
    pub fn for_window(window_secs: u32) -> Self {
        match window_secs {
            0..=60 => LimitTier::Minute,
            61..=3600 => LimitTier::Hour,
            _ => LimitTier::Day,
        }
    }

    /// Returns the string representation of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitTier::Minute => "minute",
            LimitTier::Hour => "hour",
            LimitTier::Day => "day",
            LimitTier::Quota => "quota",
        }
    }
}

impl fmt::Display for LimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one coordinator check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    /// Service the check ran against.
    pub service: String,
    /// Tier of the service's window.
    pub tier: LimitTier,
    /// Whether the caller may proceed.
    pub allowed: bool,
    /// How long to wait before retrying. Zero when allowed.
    pub retry_after: Duration,
    /// Admissions counted in the current window (including this one).
    pub usage: u32,
    /// Effective limit for the window.
    pub limit: u32,
    /// Admissions left before denial.
    pub remaining: u32,
    /// When the window frees its next slot.
    pub reset_at: Timestamp,
    /// The coordination store was unreachable and the check failed open.
    pub degraded: bool,
    /// An upstream ceiling is constraining this key.
    pub upstream_capped: bool,
}

impl RateLimitDecision {
    /// A fail-open decision taken without consulting the store.
    pub fn degraded(service: impl Into<String>, limit: u32, window_secs: u32) -> Self {
        let now = Timestamp::now();
        Self {
            service: service.into(),
            tier: LimitTier::for_window(window_secs),
            allowed: true,
            retry_after: Duration::ZERO,
            usage: 0,
            limit,
            remaining: limit,
            reset_at: now.plus_secs(window_secs as u64),
            degraded: true,
            upstream_capped: false,
        }
    }

    /// Retry-after rounded up to whole seconds, at least 1 on denial.
    pub fn retry_after_secs(&self) -> u64 {
        if self.allowed {
            return 0;
        }
        ceil_secs(self.retry_after).max(1)
    }

    /// Converts a denial into `LimitError::RateLimitExceeded`.
    pub fn into_result(self) -> Result<Self, LimitError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(LimitError::RateLimitExceeded {
                service: self.service,
                tier: self.tier,
                limit: self.limit,
                retry_after: self.retry_after,
            })
        }
    }
}

/// Rounds a duration up to whole seconds.
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denial(retry_after: Duration) -> RateLimitDecision {
        RateLimitDecision {
            service: "model-inference".to_string(),
            tier: LimitTier::Minute,
            allowed: false,
            retry_after,
            usage: 50,
            limit: 50,
            remaining: 0,
            reset_at: Timestamp::now(),
            degraded: false,
            upstream_capped: false,
        }
    }

    #[test]
    fn tier_for_window_classifies_lengths() {
        assert_eq!(LimitTier::for_window(60), LimitTier::Minute);
        assert_eq!(LimitTier::for_window(900), LimitTier::Hour);
        assert_eq!(LimitTier::for_window(3600), LimitTier::Hour);
        assert_eq!(LimitTier::for_window(86_400), LimitTier::Day);
    }

    #[test]
    fn tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&LimitTier::Quota).unwrap(), "\"quota\"");
    }

    #[test]
    fn retry_after_secs_rounds_up() {
        assert_eq!(denial(Duration::from_millis(49_200)).retry_after_secs(), 50);
        assert_eq!(denial(Duration::from_millis(10)).retry_after_secs(), 1);
        assert_eq!(denial(Duration::ZERO).retry_after_secs(), 1);
    }

    #[test]
    fn degraded_decision_admits() {
        let decision = RateLimitDecision::degraded("api-minute", 60, 60);
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.retry_after_secs(), 0);
    }

    #[test]
    fn into_result_maps_denial_to_rate_limit_exceeded() {
        let err = denial(Duration::from_secs(12)).into_result().unwrap_err();
        match err {
            LimitError::RateLimitExceeded {
                service,
                tier,
                limit,
                retry_after,
            } => {
                assert_eq!(service, "model-inference");
                assert_eq!(tier, LimitTier::Minute);
                assert_eq!(limit, 50);
                assert_eq!(retry_after, Duration::from_secs(12));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
