//! Rate Sentinel - distributed rate limiting and subscription quotas.
//!
//! Admits or denies inbound API requests and outbound provider calls against
//! sliding-window limits shared by every process through one coordination
//! store, and meters tenants against durable per-period quotas.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
