use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::HandleContext;
use crate::error::HandlerError;
use crate::lock::{LockKey, MessageLock};
use crate::telemetry::metric_inc_queue;

use super::{Middleware, Next};

/// Runs the inner stages at most once per message id and queue.
///
/// If the lock is already held the message counts as handled elsewhere:
/// the stage returns `true` without calling `next`, so this instance
/// deletes its copy. After a successful run the lock is kept, which makes
/// later redeliveries of the same message no-ops until the TTL runs out.
/// Releasing it there would let a redelivery run the handler a second time.
/// After a failed or panicking run the lock is released so the retry can proceed.
pub struct ExactlyOnceMiddleware {
    lock: Arc<dyn MessageLock>,
    ttl: Duration,
}

impl ExactlyOnceMiddleware {
    pub fn new(lock: Arc<dyn MessageLock>, ttl: Duration) -> Self {
        Self { lock, ttl }
    }

    async fn release(&self, key: &LockKey) {
        if let Err(err) = self.lock.release(key).await {
            // The TTL frees the key eventually.
            warn!(lock_key = %key, error = %err, "failed to release message lock");
        }
    }
}

#[async_trait]
impl Middleware for ExactlyOnceMiddleware {
    async fn handle(
        &self,
        ctx: &HandleContext,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool, HandlerError> {
        let key = LockKey::new(&ctx.queue, &ctx.message_type, ctx.message_id());

        let response = self.lock.try_acquire(&key, self.ttl).await?;
        if !response.acquired {
            debug!(
                queue = %ctx.queue,
                message_id = %ctx.raw.id,
                lock_key = %key,
                "message already claimed, skipping handler"
            );
            metric_inc_queue("queue_bus.exactly_once.skipped", &ctx.queue);
            return Ok(true);
        }

        let result = match AssertUnwindSafe(next.run(ctx, cancel)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                self.release(&key).await;
                resume_unwind(panic);
            }
        };

        if !matches!(result, Ok(true)) {
            self.release(&key).await;
        }

        result
    }
}
