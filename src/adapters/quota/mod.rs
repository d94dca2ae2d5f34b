//! Quota store adapters.
//!
//! - `InMemoryQuotaStore` - Mutex-guarded store for tests and single-process use
//!
//! The PostgreSQL implementation lives with the other database adapters in
//! `adapters::postgres`.

mod in_memory;

pub use in_memory::InMemoryQuotaStore;
