//! Rate limiting domain.
//!
//! Service descriptors, the registry snapshot, keys, decisions, upstream
//! metadata and the shared error taxonomy.

mod decision;
mod errors;
mod key;
mod registry;
mod service_limit;
mod upstream;

pub use decision::{ceil_secs, LimitTier, RateLimitDecision};
pub use errors::LimitError;
pub use key::{CallerId, RateLimitKey};
pub use registry::{RegistryError, ResolvedLimit, ServiceRegistry};
pub use service_limit::{ServiceLimit, MAX_WINDOW_SECS};
pub use upstream::{ProviderRateLimit, UpstreamCeiling};
