//! Service limit table configuration
//!
//! Limits come from three layers, later ones replacing earlier entries of
//! the same name:
//!
//! 1. Built-in provider and inbound limits
//! 2. `rate_limits.services` in the config file
//! 3. The YAML document at `rate_limits.services_file`
//!
//! ```yaml
//! services:
//!   - name: model-inference
//!     max_requests: 40
//!     window_secs: 60
//!   - name: partner-search
//!     max_requests: 10
//!     window_secs: 1
//!     enforce: false
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::rate_limit::{ServiceLimit, ServiceRegistry};

use super::error::{ConfigError, ValidationError};

/// Rate limit configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitsConfig {
    /// Service limits layered over the built-in table
    #[serde(default)]
    pub services: Vec<ServiceLimit>,

    /// Extra seconds a window key outlives its window
    #[serde(default = "default_key_ttl_margin")]
    pub key_ttl_margin_secs: u64,

    /// Optional YAML file with more service limits
    #[serde(default)]
    pub services_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: Vec<ServiceLimit>,
}

impl RateLimitsConfig {
    pub fn key_ttl_margin(&self) -> Duration {
        Duration::from_secs(self.key_ttl_margin_secs)
    }

    /// Builds the immutable registry from every layer.
    pub fn build_registry(&self) -> Result<ServiceRegistry, ConfigError> {
        let mut limits = ServiceRegistry::default_limits();
        merge(&mut limits, self.services.iter().cloned());

        if let Some(path) = &self.services_file {
            merge(&mut limits, read_services_file(path)?);
        }

        Ok(ServiceRegistry::new(limits)?)
    }

    /// Validate rate limit configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key_ttl_margin_secs == 0 || self.key_ttl_margin_secs > 3600 {
            return Err(ValidationError::InvalidKeyTtlMargin);
        }
        for limit in &self.services {
            limit
                .validate()
                .map_err(|e| ValidationError::InvalidServiceLimit {
                    service: limit.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            key_ttl_margin_secs: default_key_ttl_margin(),
            services_file: None,
        }
    }
}

fn default_key_ttl_margin() -> u64 {
    60
}

fn merge(limits: &mut Vec<ServiceLimit>, overrides: impl IntoIterator<Item = ServiceLimit>) {
    for limit in overrides {
        match limits.iter_mut().find(|existing| existing.name == limit.name) {
            Some(existing) => *existing = limit,
            None => limits.push(limit),
        }
    }
}

fn read_services_file(path: &Path) -> Result<Vec<ServiceLimit>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ServicesFileUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ServicesFile =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::ServicesFileInvalid {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(file.services)
}
