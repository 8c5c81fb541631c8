//! A client-side queue consumption and dispatch engine.
//!
//! This crate turns a set of pollable queue endpoints into a **bounded,
//! concurrent, at-least-once** consumption pipeline with
//! exactly-once-capable handler dispatch.
//!
//! ```text
//! QueueEndpoint → ReceiveBuffer → Multiplexer → ConsumerPool → MessageDispatcher → Pipeline
//! ```
//!
//! ## Guarantees
//! - Bounded memory: every stage hands off through a bounded channel
//! - Explicit backpressure from the workers back to every fetch loop
//! - Fetch loops survive any backend error
//! - A handled message is deleted once; an unhandled one is never deleted
//! - Graceful shutdown: in-flight handlers always run to completion
//!
//! ## Non-Guarantees
//! - Exactly-once delivery (only exactly-once handler invocation, best effort)
//! - Ordering within or across queues
//! - Persistence of consumption state beyond the queue backend
//!
//! The wire-level queue client is not part of this crate: implement
//! [`QueueEndpoint`] for your backend.

mod backoff;
mod bus;
mod config;
mod context;
mod dispatcher;
mod endpoint;
mod error;
mod handler;
mod lock;
mod monitor;
mod multiplexer;
mod receive_buffer;
mod serialization;
mod telemetry;
mod types;
mod worker;

pub mod middleware;

#[cfg(feature = "redis")]
mod lock_redis;

#[cfg(feature = "postgres")]
mod lock_postgres;

pub use backoff::{BackoffDecision, BackoffPolicy, BackoffStrategy, ExponentialBackoff, FixedBackoff};
pub use bus::{BusHandle, MessageBus};
pub use config::{ConsumerPoolConfig, ExactlyOnceOptions, HandlerOptions, MAX_BATCH_SIZE, WORKERS_PER_CORE};
pub use context::{HandleContext, MessageActions};
pub use dispatcher::{DispatchOutcome, MessageDispatcher};
pub use endpoint::{InMemoryQueue, QueueEndpoint};
pub use error::{
    BusError,
    ConfigError,
    HandlerError,
    LockError,
    PipelineError,
    QueueError,
    SerializationError,
};
pub use handler::{FnResolver, Handler, HandlerResolver, StaticResolver};
pub use lock::{InMemoryMessageLock, LockKey, LockResponse, MessageLock, DEFAULT_LOCK_TTL};
pub use middleware::{MiddlewareMap, Pipeline, PipelineBuilder};
pub use monitor::{DiscardReason, MessageMonitor, MonitorGuard, NullMonitor, TracingMonitor};
pub use multiplexer::Multiplexer;
pub use receive_buffer::ReceiveBuffer;
pub use serialization::{DeserializedMessage, JsonEnvelopeSerializer, Message, MessageSerializer};
pub use types::{
    MessageAttributes,
    MessageId,
    MessageType,
    QueueIdentity,
    QueueName,
    RawMessage,
    ReceiptHandle,
    ReceivedMessage,
};
pub use worker::{ConsumerPool, ShutdownReason};

#[cfg(feature = "metrics")]
pub use monitor::MetricsMonitor;

#[cfg(feature = "redis")]
pub use lock_redis::RedisMessageLock;

#[cfg(feature = "postgres")]
pub use lock_postgres::PostgresMessageLock;

// Re-exported so callers can build tokens without naming tokio-util.
pub use tokio_util::sync::CancellationToken;
