use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for CounterStoreError {
    fn from(err: redis::RedisError) -> Self {
        CounterStoreError::Unavailable(err.to_string())
    }
}

/// Fast expiring key/counter store backing the redemption limiter.
///
/// Every key carries a TTL; once it lapses the key reads as absent.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and return the new value. The TTL is attached
    /// when the key is created and is not extended by later increments.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError>;

    /// Set `key` only if it does not exist. Returns whether it was set.
    async fn set_nx(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, CounterStoreError>;

    async fn delete(&self, key: &str) -> Result<(), CounterStoreError>;
}
