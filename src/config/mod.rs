//! Application configuration module
//!
//! Configuration is layered from, lowest precedence first:
//!
//! 1. Built-in defaults on every section
//! 2. An optional YAML or TOML file named by `RATE_SENTINEL_CONFIG`
//! 3. Environment variables with the `RATE_SENTINEL` prefix, `__` separating
//!    nested keys
//!
//! `.env` is loaded first when present (development).
//!
//! # Example
//!
//! ```no_run
//! use rate_sentinel::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Listening on {}", config.server.socket_addr().unwrap());
//! ```

mod database;
mod error;
mod logging;
mod quota;
mod rate_limits;
mod redis;
mod retry;
mod server;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::{LogFormat, LoggingConfig};
pub use quota::QuotaConfig;
pub use rate_limits::RateLimitsConfig;
pub use redis::RedisConfig;
pub use retry::RetryConfig;
pub use server::ServerConfig;

use serde::Deserialize;

/// Environment variable naming the optional configuration file.
pub const CONFIG_FILE_VAR: &str = "RATE_SENTINEL_CONFIG";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RATE_SENTINEL";

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Coordination store for sliding windows
    pub redis: RedisConfig,

    /// Durable quota records
    pub database: DatabaseConfig,

    /// Service limit table
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,

    /// Tier ceilings and outage grace
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Backoff for outbound calls
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the optional file and the environment
    ///
    /// # Environment Variable Format
    ///
    /// - `RATE_SENTINEL__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `RATE_SENTINEL__QUOTA__OUTAGE_GRACE_SECS=30` -> `quota.outage_grace_secs = 30`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, required values are
    /// missing, or values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_VAR) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(
                config::Environment::default()
                    .prefix(ENV_PREFIX)
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found, section by section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.redis.validate()?;
        self.database.validate()?;
        self.rate_limits.validate()?;
        self.quota.validate()?;
        self.retry.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
