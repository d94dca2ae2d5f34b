//! Retry policy configuration
//!
//! The server binary makes no outbound calls; this section configures the
//! [`RetryController`] handed to a `TrackedClient` or `BlockingLimiter` by
//! processes that embed the library.

use serde::Deserialize;
use std::time::Duration;

use crate::application::{RetryController, RetryPolicy, MAX_JITTER};

use super::error::ValidationError;

/// Backoff settings for rate-limited upstream calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff step in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Longest single wait before giving up, in seconds
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Symmetric jitter fraction, at most 0.2
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            jitter: self.jitter,
        }
    }

    /// A controller applying this policy.
    pub fn controller(&self) -> RetryController {
        RetryController::new(self.policy())
    }

    /// Validate retry configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_retries > 10 {
            return Err(ValidationError::TooManyRetries);
        }
        if !(0.0..=MAX_JITTER).contains(&self.jitter) {
            return Err(ValidationError::InvalidJitter);
        }
        if self.base_delay_ms == 0 || self.base_delay_ms > self.max_delay_secs * 1000 {
            return Err(ValidationError::InvalidRetryDelay);
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_jitter() -> f64 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_defaults() {
        assert_eq!(RetryConfig::default().policy(), RetryPolicy::default());
    }

    #[test]
    fn test_validation_rejects_bad_jitter() {
        for jitter in [-0.1, 0.25, 0.5, 1.0, f64::NAN] {
            let config = RetryConfig {
                jitter,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(ValidationError::InvalidJitter)));
        }
    }

    #[test]
    fn test_validation_accepts_jitter_up_to_twenty_percent() {
        for jitter in [0.0, 0.1, 0.2] {
            let config = RetryConfig {
                jitter,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_controller_carries_configured_policy() {
        let config = RetryConfig {
            max_retries: 1,
            base_delay_ms: 250,
            ..Default::default()
        };
        let controller = config.controller();
        assert_eq!(controller.policy().max_retries, 1);
        assert_eq!(controller.policy().base_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_validation_rejects_base_above_max() {
        let config = RetryConfig {
            base_delay_ms: 5_000,
            max_delay_secs: 2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidRetryDelay)
        ));
    }

    #[test]
    fn test_validation_rejects_too_many_retries() {
        let config = RetryConfig {
            max_retries: 50,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
