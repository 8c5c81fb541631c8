#[cfg(feature = "postgres")]
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use tokio_postgres::Client;

#[cfg(feature = "postgres")]
use crate::error::LockError;
#[cfg(feature = "postgres")]
use crate::lock::{LockKey, LockResponse, MessageLock};

/// Message lock backed by a Postgres table.
///
/// A row per held key with an absolute expiry. Acquiring an expired key
/// takes it over in the same statement.
#[cfg(feature = "postgres")]
pub struct PostgresMessageLock {
    client: Client,
}

#[cfg(feature = "postgres")]
impl PostgresMessageLock {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS queue_bus_locks (
                    id TEXT PRIMARY KEY,
                    expires_at_ms BIGINT NOT NULL
                )",
                &[],
            )
            .await?;

        Ok(Self { client })
    }
}

#[cfg(feature = "postgres")]
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(feature = "postgres")]
#[async_trait]
impl MessageLock for PostgresMessageLock {
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> Result<LockResponse, LockError> {
        let now = now_ms();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_ms);

        let row = self
            .client
            .query_opt(
                "INSERT INTO queue_bus_locks (id, expires_at_ms)
                 VALUES ($1, $2)
                 ON CONFLICT (id) DO UPDATE SET expires_at_ms = EXCLUDED.expires_at_ms
                 WHERE queue_bus_locks.expires_at_ms <= $3
                 RETURNING id",
                &[&key.as_str(), &expires_at, &now],
            )
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(LockResponse {
            acquired: row.is_some(),
        })
    }

    async fn release(&self, key: &LockKey) -> Result<(), LockError> {
        self.client
            .execute("DELETE FROM queue_bus_locks WHERE id = $1", &[&key.as_str()])
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(())
    }
}
