//! Reservation state store.
//!
//! A process-external key-value store is the source of truth for which user
//! holds which server. Writes are atomic per key; nothing relies on
//! cross-key transactions.

mod memory;
mod postgres;
mod reservations;

pub use memory::MemoryStore;
pub use postgres::PgKeyValueStore;
pub use reservations::Reservations;

use async_trait::async_trait;
use thiserror::Error;

/// Key-value store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed value for '{key}': {value}")]
    Malformed { key: String, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value for `key`, `None` if absent.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// All entries whose key starts with `prefix`, sorted by key.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>>;
}
