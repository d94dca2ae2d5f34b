//! Domain layer - Core business logic and types.
//!
//! Pure types and invariants with no I/O. Stores, clocks and transports are
//! reached through the traits in `crate::ports`.

pub mod foundation;
pub mod quota;
pub mod rate_limit;
