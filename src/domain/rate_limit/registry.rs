//! Service limit registry.
//!
//! An immutable snapshot of every service's limit, built once at process
//! start and passed explicitly to the coordinator. Tests build alternate
//! registries freely; nothing here reads process-global state.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::foundation::ValidationError;

use super::{LimitError, ServiceLimit};

/// Errors raised while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid limit for service '{service}': {source}")]
    InvalidLimit {
        service: String,
        #[source]
        source: ValidationError,
    },

    #[error("service '{0}' is registered twice")]
    Duplicate(String),
}

/// A registry lookup, flagging when the conservative fallback was used.
#[derive(Debug, Clone)]
pub struct ResolvedLimit {
    /// The limit to enforce.
    pub limit: Arc<ServiceLimit>,
    /// True when the requested service was unknown.
    pub fallback: bool,
}

/// Immutable table of service limits.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<ServiceLimit>>,
    conservative: Option<Arc<ServiceLimit>>,
}

impl ServiceRegistry {
    /// Builds a registry, validating every descriptor.
    pub fn new(limits: impl IntoIterator<Item = ServiceLimit>) -> Result<Self, RegistryError> {
        let mut services = HashMap::new();
        for limit in limits {
            limit.validate().map_err(|source| RegistryError::InvalidLimit {
                service: limit.name.clone(),
                source,
            })?;
            if services.contains_key(&limit.name) {
                return Err(RegistryError::Duplicate(limit.name));
            }
            services.insert(limit.name.clone(), Arc::new(limit));
        }

        let conservative = services
            .values()
            .min_by(|a, b| {
                a.rate_per_sec()
                    .partial_cmp(&b.rate_per_sec())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.name.cmp(&b.name))
            })
            .map(|limit| {
                Arc::new(ServiceLimit {
                    enforce: true,
                    ..ServiceLimit::clone(limit)
                })
            });

        Ok(Self {
            services,
            conservative,
        })
    }

    /// Registry populated with the built-in provider and inbound limits.
    pub fn with_defaults() -> Self {
        Self::new(Self::default_limits()).unwrap_or_default()
    }

    /// Built-in limits.
    ///
    /// | Service | Requests | Window |
    /// |---------|----------|--------|
    /// | social-user-timeline | 900 | 15 min |
    /// | social-user-lookup | 900 | 15 min |
    /// | social-tweet-lookup | 300 | 15 min |
    /// | model-inference | 50 | 1 min |
    /// | model-inference-pro | 100 | 1 min |
    /// | api-minute | 60 | 1 min |
    /// | api-hour | 1000 | 1 hour |
    pub fn default_limits() -> Vec<ServiceLimit> {
        [
            ("social-user-timeline", 900, 900),
            ("social-user-lookup", 900, 900),
            ("social-tweet-lookup", 300, 900),
            ("model-inference", 50, 60),
            ("model-inference-pro", 100, 60),
            ("api-minute", 60, 60),
            ("api-hour", 1000, 3600),
        ]
        .into_iter()
        .map(|(name, max_requests, window_secs)| ServiceLimit {
            name: name.to_string(),
            max_requests,
            window_secs,
            enforce: true,
        })
        .collect()
    }

    /// Strict lookup.
    pub fn lookup(&self, service: &str) -> Result<Arc<ServiceLimit>, LimitError> {
        self.services
            .get(service)
            .cloned()
            .ok_or_else(|| LimitError::UnknownService(service.to_string()))
    }

    /// Lookup that falls back to the most conservative registered limit.
    ///
    /// Only an empty registry yields `UnknownService`.
    pub fn resolve(&self, service: &str) -> Result<ResolvedLimit, LimitError> {
        if let Some(limit) = self.services.get(service) {
            return Ok(ResolvedLimit {
                limit: limit.clone(),
                fallback: false,
            });
        }
        self.conservative
            .clone()
            .map(|limit| ResolvedLimit {
                limit,
                fallback: true,
            })
            .ok_or_else(|| LimitError::UnknownService(service.to_string()))
    }

    /// Fails when any of `required` is missing. Run at startup.
    pub fn validate_required<S: AsRef<str>>(&self, required: &[S]) -> Result<(), LimitError> {
        for name in required {
            self.lookup(name.as_ref())?;
        }
        Ok(())
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when no services are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
