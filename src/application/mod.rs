//! Application layer - admission services built on the ports.
//!
//! The coordinator and quota tracker enforce limits; the upstream sync and
//! retry controller handle the provider side of outbound calls; the request
//! gate combines them for inbound API traffic.

mod coordinator;
mod quota_tracker;
mod request_gate;
mod retry;
mod upstream_sync;

pub use coordinator::{most_constraining, RateLimitCoordinator, DEFAULT_STORE_TIMEOUT};
pub use quota_tracker::QuotaTracker;
pub use request_gate::{
    GateMetrics, GateMetricsSnapshot, GateVerdict, RequestGate, API_HOUR, API_MINUTE,
    GATE_SERVICES,
};
pub use retry::{
    CallError, RateLimitRejection, RetryController, RetryError, RetryPolicy, RetryState,
    MAX_JITTER,
};
pub use upstream_sync::{SyncOutcome, UpstreamSync, LOW_REMAINING_THRESHOLD};
