//! Cache layer
//!
//! A present entry is a hint, never authoritative. Reads go through
//! [`CacheLayer::read_through`], which treats any store failure as a miss
//! and never caches absence. Writes invalidate the entity's direct key and
//! sweep every listing namespace that could contain it. The sweep is broad
//! on purpose: listing pages go cold after any mutation.

pub mod keys;
pub mod layer;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use keys::CacheNamespace;
pub use layer::CacheLayer;
pub use memory::MemoryCacheStore;
pub use redis_store::RedisCacheStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Cache entry could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Unavailable(e.to_string())
    }
}

impl From<CacheError> for pb_common::PostBusError {
    fn from(e: CacheError) -> Self {
        pb_common::PostBusError::CacheUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Key/value store with per-entry TTL. Every operation is atomic per key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Delete keys, returning how many existed. Missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
