#[cfg(feature = "redis")]
use std::time::Duration;

#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use redis::AsyncCommands;

#[cfg(feature = "redis")]
use crate::error::LockError;
#[cfg(feature = "redis")]
use crate::lock::{LockKey, LockResponse, MessageLock};

/// Message lock backed by Redis `SET NX PX`.
#[cfg(feature = "redis")]
pub struct RedisMessageLock {
    client: redis::Client,
    prefix: String,
}

#[cfg(feature = "redis")]
impl RedisMessageLock {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn lock_key(&self, key: &LockKey) -> String {
        format!("{}:lock:{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::Connection, LockError> {
        self.client
            .get_tokio_connection()
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl MessageLock for RedisMessageLock {
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> Result<LockResponse, LockError> {
        let mut conn = self.connection().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        // SET .. NX replies OK on success and nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(key))
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(LockResponse {
            acquired: reply.is_some(),
        })
    }

    async fn release(&self, key: &LockKey) -> Result<(), LockError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.lock_key(key))
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }
}
