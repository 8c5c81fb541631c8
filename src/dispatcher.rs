use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backoff::BackoffPolicy;
use crate::context::{HandleContext, MessageActions};
use crate::endpoint::QueueEndpoint;
use crate::error::SerializationError;
use crate::middleware::MiddlewareMap;
use crate::monitor::{DiscardReason, MessageMonitor, MonitorGuard};
use crate::serialization::MessageSerializer;
use crate::telemetry::{metric_inc, metric_inc_queue};
use crate::types::{MessageType, QueueName, RawMessage, ReceivedMessage};

/// What happened to one dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The pipeline handled the message and it was deleted.
    Acknowledged,

    /// The pipeline did not handle the message; it stays on the queue.
    LeftForRetry,

    /// The message can never be handled and was deleted unprocessed.
    Discarded(DiscardReason),
}

/// Runs one message through deserialize → lookup → pipeline → ack/retry.
///
/// `dispatch` never fails: every error is terminal for the message only,
/// and is logged and reported to the monitor.
pub struct MessageDispatcher {
    serializer: Arc<dyn MessageSerializer>,
    middleware: Arc<MiddlewareMap>,
    backoff: Option<BackoffPolicy>,
    monitor: MonitorGuard,
}

impl MessageDispatcher {
    pub fn new(
        serializer: Arc<dyn MessageSerializer>,
        middleware: Arc<MiddlewareMap>,
        monitor: MonitorGuard,
    ) -> Self {
        Self {
            serializer,
            middleware,
            backoff: None,
            monitor,
        }
    }

    /// Adjust visibility of unhandled messages according to `policy`.
    ///
    /// Without a policy, unhandled messages keep the visibility timeout
    /// they were received with.
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = Some(policy);
        self
    }

    pub async fn dispatch(
        &self,
        received: ReceivedMessage,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let ReceivedMessage { endpoint, message } = received;
        let queue = endpoint.identity().name.clone();

        let deserialized = match self.serializer.deserialize(&message.body) {
            Ok(deserialized) => deserialized,
            Err(err) => {
                let reason = if err.is_unroutable() {
                    DiscardReason::UnknownMessageType
                } else {
                    DiscardReason::Malformed
                };
                let message_type = match &err {
                    SerializationError::UnknownMessageType(tag) => Some(tag.clone()),
                    _ => None,
                };
                warn!(
                    queue = %queue,
                    message_id = %message.id,
                    error = %err,
                    "cannot deserialize message, discarding"
                );
                self.monitor.on_exception(message_type.as_ref(), &err);
                return self
                    .discard(endpoint.as_ref(), &queue, &message, message_type.as_ref(), reason)
                    .await;
            }
        };

        let message_type = deserialized.message_type.clone();
        let Some(pipeline) = self.middleware.get(&queue, &message_type) else {
            warn!(
                queue = %queue,
                message_id = %message.id,
                message_type = %message_type,
                "no handler registered for message type, discarding"
            );
            return self
                .discard(
                    endpoint.as_ref(),
                    &queue,
                    &message,
                    Some(&message_type),
                    DiscardReason::NoHandler,
                )
                .await;
        };

        let actions = MessageActions::new(endpoint.clone(), message.receipt_handle.clone());
        let ctx = HandleContext::new(queue.clone(), message, deserialized, actions);

        let dispatch_cancel = cancel.child_token();
        let result = pipeline.run(&ctx, &dispatch_cancel).await;

        match result {
            Ok(true) => {
                self.delete(endpoint.as_ref(), &queue, &ctx.raw).await;
                metric_inc_queue("queue_bus.dispatch.acknowledged", &queue);
                DispatchOutcome::Acknowledged
            }
            Ok(false) => {
                debug!(
                    queue = %queue,
                    message_id = %ctx.raw.id,
                    message_type = %message_type,
                    "message not handled, leaving for redelivery"
                );
                self.back_off(endpoint.as_ref(), &queue, &ctx.raw).await;
                metric_inc_queue("queue_bus.dispatch.retried", &queue);
                DispatchOutcome::LeftForRetry
            }
            Err(err) => {
                error!(
                    queue = %queue,
                    message_id = %ctx.raw.id,
                    message_type = %message_type,
                    error = %err,
                    "pipeline failed, leaving message for redelivery"
                );
                self.monitor.on_exception(Some(&message_type), err.as_ref());
                self.back_off(endpoint.as_ref(), &queue, &ctx.raw).await;
                metric_inc_queue("queue_bus.dispatch.failed", &queue);
                DispatchOutcome::LeftForRetry
            }
        }
    }

    async fn discard(
        &self,
        endpoint: &dyn QueueEndpoint,
        queue: &QueueName,
        message: &RawMessage,
        message_type: Option<&MessageType>,
        reason: DiscardReason,
    ) -> DispatchOutcome {
        self.delete(endpoint, queue, message).await;
        self.monitor.on_discarded(queue, message_type, reason);
        metric_inc("queue_bus.dispatch.discarded");
        DispatchOutcome::Discarded(reason)
    }

    async fn delete(&self, endpoint: &dyn QueueEndpoint, queue: &QueueName, message: &RawMessage) {
        match endpoint.delete_message(&message.receipt_handle).await {
            Ok(()) => debug!(queue = %queue, message_id = %message.id, "message deleted"),
            Err(err) => {
                // The message will be redelivered; exactly-once handlers absorb that.
                warn!(
                    queue = %queue,
                    message_id = %message.id,
                    error = %err,
                    "failed to delete message"
                );
                self.monitor.on_exception(None, &err);
            }
        }
    }

    async fn back_off(&self, endpoint: &dyn QueueEndpoint, queue: &QueueName, message: &RawMessage) {
        let Some(policy) = &self.backoff else { return };

        let attempt = message.attributes.approximate_receive_count;
        let decision = policy.decide(attempt);
        if !decision.retry_locally {
            debug!(
                queue = %queue,
                message_id = %message.id,
                attempt,
                "retries exhausted, leaving message to the queue's redrive policy"
            );
            return;
        }

        match endpoint
            .change_visibility(&message.receipt_handle, decision.next_visibility_timeout)
            .await
        {
            Ok(()) => debug!(
                queue = %queue,
                message_id = %message.id,
                attempt,
                visibility_ms = decision.next_visibility_timeout.as_millis() as u64,
                "visibility updated"
            ),
            Err(err) => {
                warn!(
                    queue = %queue,
                    message_id = %message.id,
                    error = %err,
                    "failed to update message visibility"
                );
                self.monitor.on_exception(None, &err);
            }
        }
    }
}
