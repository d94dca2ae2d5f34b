//! Service limit descriptors.
//!
//! A descriptor says how many requests a logical service admits per sliding
//! window. Descriptors are immutable once loaded.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::foundation::ValidationError;

/// Longest window a descriptor may declare (31 days).
pub const MAX_WINDOW_SECS: u32 = 31 * 86_400;

/// Limit for one logical service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLimit {
    /// Logical service name (e.g., "model-inference").
    pub name: String,
    /// Maximum admissions per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u32,
    /// When false the limit is observed but never denies (shadow mode).
    #[serde(default = "default_enforce")]
    pub enforce: bool,
}

fn default_enforce() -> bool {
    true
}

impl ServiceLimit {
    /// Creates an enforced descriptor, validating its bounds.
    pub fn new(
        name: impl Into<String>,
        max_requests: u32,
        window_secs: u32,
    ) -> Result<Self, ValidationError> {
        let limit = Self {
            name: name.into(),
            max_requests,
            window_secs,
            enforce: true,
        };
        limit.validate()?;
        Ok(limit)
    }

    /// Returns a copy that only observes traffic.
    pub fn shadow(mut self) -> Self {
        self.enforce = false;
        self
    }

    /// Window length as a Duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs as u64)
    }

    /// Admissions per second this descriptor allows on average.
    pub fn rate_per_sec(&self) -> f64 {
        self.max_requests as f64 / self.window_secs.max(1) as f64
    }

    /// Validates name format and numeric bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::empty_field("service.name"));
        }
        if self.name.contains(':') || self.name.chars().any(char::is_whitespace) {
            return Err(ValidationError::invalid_format(
                "service.name",
                "must not contain ':' or whitespace",
            ));
        }
        if self.max_requests == 0 {
            return Err(ValidationError::out_of_range(
                "service.max_requests",
                1,
                u32::MAX as u64,
                0,
            ));
        }
        if self.window_secs == 0 || self.window_secs > MAX_WINDOW_SECS {
            return Err(ValidationError::out_of_range(
                "service.window_secs",
                1,
                MAX_WINDOW_SECS as u64,
                self.window_secs as u64,
            ));
        }
        Ok(())
    }
}
