//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::rate_limit::RegistryError;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("Could not read services file {path}: {source}")]
    ServicesFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse services file {path}: {source}")]
    ServicesFileInvalid {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid service registry: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid bind address")]
    InvalidBindAddress,

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Redis command timeout must be between 1 and 10000 ms")]
    InvalidCommandTimeout,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("Invalid limit for service '{service}': {reason}")]
    InvalidServiceLimit { service: String, reason: String },

    #[error("Key TTL margin must be between 1 and 3600 seconds")]
    InvalidKeyTtlMargin,

    #[error("Quota ceilings must be positive")]
    InvalidQuotaLimit,

    #[error("Quota outage grace must not exceed 3600 seconds")]
    OutageGraceTooLong,

    #[error("Retry jitter must be in [0, 0.2]")]
    InvalidJitter,

    #[error("Retry base delay must be positive and not exceed max delay")]
    InvalidRetryDelay,

    #[error("Retry count exceeds maximum allowed (10)")]
    TooManyRetries,

    #[error("Empty log filter")]
    EmptyLogFilter,
}
