//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers and validation errors shared by the
//! rate limiting and quota domains.

mod errors;
mod ids;
mod timestamp;

pub use errors::ValidationError;
pub use ids::{CredentialId, QuotaRecordId, TenantId};
pub use timestamp::Timestamp;
