//! PostgreSQL adapters.

mod quota_repository;

pub use quota_repository::PostgresQuotaStore;
