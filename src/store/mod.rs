//! Counter/cache store.
//!
//! # Data Flow
//! ```text
//! cache middleware        → get / set(ttl)
//! window rate limiters    → incr / expire / del
//! system health checker   → ping
//! ```
//!
//! # Design Decisions
//! - The gateway only depends on the `CounterStore` trait
//! - Callers treat store failures as best-effort (log and continue)

pub mod memory;

use async_trait::async_trait;
use axum::body::Bytes;
use std::time::Duration;

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("value at `{0}` is not an integer")]
    NotAnInteger(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store with TTLs and atomic counters.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Store a value. `None` keeps it until deleted.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Increment the integer at `key`, creating it at 0 first. Returns the new value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set a TTL on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Returns true if a key was removed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
