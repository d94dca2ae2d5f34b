//! Sliding-window store port.
//!
//! The coordination store is the only serialization point between processes.
//! Implementations must make each operation a single atomic step against the
//! store: eviction, counting, ceiling consultation and the conditional insert
//! of `admit` must not be separately observable, otherwise two callers racing
//! for the last slot could both be admitted.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::foundation::Timestamp;
use crate::domain::rate_limit::{RateLimitKey, UpstreamCeiling};

/// Port for the shared sliding-window counter.
#[async_trait]
pub trait SlidingWindowStore: Send + Sync {
    /// Evicts expired entries, counts, and records an entry if under both the
    /// window limit and any upstream ceiling.
    ///
    /// On admission the key's expiry is refreshed so idle keys self-clean.
    async fn admit(
        &self,
        key: &RateLimitKey,
        max_requests: u32,
        window: Duration,
    ) -> Result<WindowAdmission, StoreError>;

    /// Reads the current window without recording an entry.
    async fn usage(&self, key: &RateLimitKey, window: Duration) -> Result<WindowUsage, StoreError>;

    /// Installs an upstream ceiling unless a tighter one is already active.
    ///
    /// Returns true when the stored ceiling changed.
    async fn tighten(&self, key: &RateLimitKey, ceiling: UpstreamCeiling) -> Result<bool, StoreError>;

    /// Clears the window and its ceiling (admin operation).
    async fn reset(&self, key: &RateLimitKey) -> Result<(), StoreError>;
}

/// Result of one atomic admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAdmission {
    /// Whether an entry was recorded.
    pub allowed: bool,
    /// Entries in the window, including the new one when allowed.
    pub count: u32,
    /// Wait until a slot frees. Zero when allowed.
    pub retry_after: Duration,
    /// Ceiling units left after this admission, when a ceiling is active.
    pub ceiling_remaining: Option<u32>,
    /// Store clock at evaluation.
    pub now: Timestamp,
}

/// Snapshot of a window, read without consuming.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowUsage {
    /// Live entries in the window.
    pub count: u32,
    /// Timestamp of the oldest live entry.
    pub oldest: Option<Timestamp>,
    /// Active upstream ceiling.
    pub ceiling: Option<UpstreamCeiling>,
    /// Store clock at evaluation.
    pub now: Timestamp,
}

/// Errors from the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store is unreachable or timed out.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// Store replied with something the adapter could not interpret.
    #[error("unexpected store response: {0}")]
    InvalidResponse(String),
}
