//! HTTP middleware for axum.
//!
//! - `auth` - Tenant identity forwarded by the gateway
//! - `rate_limit` - Request gate enforcement and limit headers

pub mod auth;
pub mod rate_limit;

pub use auth::{tenant_middleware, AuthenticatedTenant, RequireTenant, TenantRequired, TENANT_HEADER};
pub use rate_limit::{rate_limit_middleware, DenialBody, LimitRejection, EXEMPT_PREFIXES};
