use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::store::{CounterStore, CounterStoreError};

/// Redis-backed counters shared by every API instance.
#[derive(Clone)]
pub struct RedisCounterStore {
    client: redis::Client,
    namespace: String,
}

impl RedisCounterStore {
    pub fn new(redis_url: &str, namespace: impl Into<String>) -> Result<Self, CounterStoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CounterStoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;

        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = redis::cmd("PEXPIRE")
                .arg(&key)
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await?;
        } else {
            // Repair keys that lost their TTL (e.g. a crash between INCR and PEXPIRE).
            let remaining: i64 = conn.pttl(&key).await?;
            if remaining < 0 {
                let _: () = redis::cmd("PEXPIRE")
                    .arg(&key)
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await?;
            }
        }
        Ok(count)
    }

    async fn set_nx(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CounterStoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;
        let present: bool = conn.exists(&key).await?;
        Ok(present)
    }

    async fn delete(&self, key: &str) -> Result<(), CounterStoreError> {
        let key = self.key(key);
        let mut conn = self.connection().await?;
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}
