use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::LockError;
use crate::types::{MessageType, QueueName};

/// Lock TTL used when a handler has no explicit exactly-once timeout.
///
/// Long enough that the lock is held until released.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(u32::MAX as u64);

/// Key identifying one message for one handler queue.
///
/// The queue is part of the key so the same message fanned out to two
/// queues is tracked independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(queue: &QueueName, message_type: &MessageType, message_id: &str) -> Self {
        Self(format!(
            "{}-{}-{}",
            queue.as_str().to_lowercase(),
            message_type.as_str().to_lowercase(),
            message_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResponse {
    pub acquired: bool,
}

/// Distributed, TTL-bound mutual exclusion keyed by [`LockKey`].
///
/// Implementations must be safe to call concurrently from many workers
/// and many processes; the engine keeps no lock state of its own.
#[async_trait]
pub trait MessageLock: Send + Sync {
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> Result<LockResponse, LockError>;

    async fn release(&self, key: &LockKey) -> Result<(), LockError>;
}

/// Single-process lock store.
#[derive(Default)]
pub struct InMemoryMessageLock {
    held: Mutex<HashMap<LockKey, Option<Instant>>>,
}

impl InMemoryMessageLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held and not expired.
    pub async fn is_held(&self, key: &LockKey) -> bool {
        let guard = self.held.lock().await;
        match guard.get(key) {
            Some(Some(expires_at)) => *expires_at > Instant::now(),
            Some(None) => true,
            None => false,
        }
    }
}

#[async_trait]
impl MessageLock for InMemoryMessageLock {
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> Result<LockResponse, LockError> {
        let now = Instant::now();
        let mut guard = self.held.lock().await;

        let taken = match guard.get(key) {
            Some(Some(expires_at)) => *expires_at > now,
            Some(None) => true,
            None => false,
        };
        if taken {
            return Ok(LockResponse { acquired: false });
        }

        // `None` means the TTL does not fit in an Instant: never expires.
        guard.insert(key.clone(), now.checked_add(ttl));
        Ok(LockResponse { acquired: true })
    }

    async fn release(&self, key: &LockKey) -> Result<(), LockError> {
        self.held.lock().await.remove(key);
        Ok(())
    }
}
