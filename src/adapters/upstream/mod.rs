//! Outbound provider calls metered by the coordinator.

mod tracked_client;

pub use tracked_client::{TrackedClient, UpstreamError};
