//! Adapters - Implementations of port interfaces and inbound surfaces.
//!
//! - `rate_limiter` - sliding-window stores (in-memory, Redis) and the blocking facade
//! - `quota` - in-memory quota store
//! - `postgres` - PostgreSQL quota store
//! - `upstream` - metered outbound HTTP client
//! - `http` - axum router, middleware and handlers

pub mod http;
pub mod postgres;
pub mod quota;
pub mod rate_limiter;
pub mod upstream;

pub use postgres::PostgresQuotaStore;
pub use quota::InMemoryQuotaStore;
pub use rate_limiter::{BlockingLimiter, InMemorySlidingWindow, RedisSlidingWindow};
pub use upstream::{TrackedClient, UpstreamError};
