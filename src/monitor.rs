use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::types::{MessageType, QueueName};

/// Why a message was deleted without reaching a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No serializer knows the message's type tag.
    UnknownMessageType,

    /// The body could not be parsed.
    Malformed,

    /// The type is known but no pipeline is registered for it on this queue.
    NoHandler,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::UnknownMessageType => write!(f, "unknown message type"),
            DiscardReason::Malformed => write!(f, "malformed message"),
            DiscardReason::NoHandler => write!(f, "no handler registered"),
        }
    }
}

/// Receives timing and error telemetry from the engine.
///
/// Every call is fire-and-forget. Implementations should return quickly;
/// they run inline on the receive loop and the workers.
pub trait MessageMonitor: Send + Sync {
    /// Time spent in one fetch call that returned successfully.
    fn on_receive_time(&self, duration: Duration, queue: &QueueName);

    /// Time spent inside a handler, whatever the outcome.
    fn on_handle_time(&self, duration: Duration, handler_type: &str, message_type: &MessageType);

    fn on_exception(&self, message_type: Option<&MessageType>, error: &dyn std::error::Error);

    /// A receive buffer found its channel full.
    fn on_throttled(&self);

    fn on_discarded(&self, _queue: &QueueName, _message_type: Option<&MessageType>, _reason: DiscardReason) {}
}

/// Monitor that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl MessageMonitor for NullMonitor {
    fn on_receive_time(&self, _duration: Duration, _queue: &QueueName) {}

    fn on_handle_time(&self, _duration: Duration, _handler_type: &str, _message_type: &MessageType) {}

    fn on_exception(&self, _message_type: Option<&MessageType>, _error: &dyn std::error::Error) {}

    fn on_throttled(&self) {}
}

/// Monitor that writes every event as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl MessageMonitor for TracingMonitor {
    fn on_receive_time(&self, duration: Duration, queue: &QueueName) {
        debug!(queue = %queue, elapsed_ms = duration.as_millis() as u64, "messages received");
    }

    fn on_handle_time(&self, duration: Duration, handler_type: &str, message_type: &MessageType) {
        debug!(
            handler = handler_type,
            message_type = %message_type,
            elapsed_ms = duration.as_millis() as u64,
            "message handled"
        );
    }

    fn on_exception(&self, message_type: Option<&MessageType>, error: &dyn std::error::Error) {
        match message_type {
            Some(message_type) => warn!(message_type = %message_type, error = %error, "message processing error"),
            None => warn!(error = %error, "message processing error"),
        }
    }

    fn on_throttled(&self) {
        info!("receive buffer throttled");
    }

    fn on_discarded(&self, queue: &QueueName, message_type: Option<&MessageType>, reason: DiscardReason) {
        let message_type = message_type.map(|t| t.as_str()).unwrap_or("");
        warn!(queue = %queue, message_type, reason = %reason, "message discarded");
    }
}

/// Monitor that records counters and histograms through the `metrics` facade.
#[cfg(feature = "metrics")]
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsMonitor;

#[cfg(feature = "metrics")]
impl MessageMonitor for MetricsMonitor {
    fn on_receive_time(&self, duration: Duration, queue: &QueueName) {
        metrics::histogram!("queue_bus.receive.seconds", duration.as_secs_f64(), "queue" => queue.0.clone());
    }

    fn on_handle_time(&self, duration: Duration, handler_type: &str, message_type: &MessageType) {
        metrics::histogram!(
            "queue_bus.handle.seconds",
            duration.as_secs_f64(),
            "handler" => handler_type.to_string(),
            "message_type" => message_type.0.clone()
        );
    }

    fn on_exception(&self, message_type: Option<&MessageType>, _error: &dyn std::error::Error) {
        let message_type = message_type.map(|t| t.0.clone()).unwrap_or_default();
        metrics::increment_counter!("queue_bus.exceptions", "message_type" => message_type);
    }

    fn on_throttled(&self) {
        metrics::increment_counter!("queue_bus.throttled");
    }

    fn on_discarded(&self, queue: &QueueName, _message_type: Option<&MessageType>, reason: DiscardReason) {
        metrics::increment_counter!(
            "queue_bus.discarded",
            "queue" => queue.0.clone(),
            "reason" => reason.to_string()
        );
    }
}

/// Wraps a monitor so a panicking implementation cannot unwind into the engine.
#[derive(Clone)]
pub struct MonitorGuard {
    inner: Arc<dyn MessageMonitor>,
}

impl MonitorGuard {
    pub fn new(inner: Arc<dyn MessageMonitor>) -> Self {
        Self { inner }
    }

    fn guarded(&self, event: &'static str, call: impl FnOnce(&dyn MessageMonitor)) {
        if catch_unwind(AssertUnwindSafe(|| call(self.inner.as_ref()))).is_err() {
            warn!(event, "message monitor panicked");
        }
    }
}

impl MessageMonitor for MonitorGuard {
    fn on_receive_time(&self, duration: Duration, queue: &QueueName) {
        self.guarded("on_receive_time", |m| m.on_receive_time(duration, queue));
    }

    fn on_handle_time(&self, duration: Duration, handler_type: &str, message_type: &MessageType) {
        self.guarded("on_handle_time", |m| m.on_handle_time(duration, handler_type, message_type));
    }

    fn on_exception(&self, message_type: Option<&MessageType>, error: &dyn std::error::Error) {
        self.guarded("on_exception", |m| m.on_exception(message_type, error));
    }

    fn on_throttled(&self) {
        self.guarded("on_throttled", |m| m.on_throttled());
    }

    fn on_discarded(&self, queue: &QueueName, message_type: Option<&MessageType>, reason: DiscardReason) {
        self.guarded("on_discarded", |m| m.on_discarded(queue, message_type, reason));
    }
}
