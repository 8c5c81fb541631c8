//! Composable stages wrapped around the terminal handler call.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`]. Each stage gets the
//! [`HandleContext`] and a [`Next`] continuation for the rest of the chain;
//! it may run work before and after calling `next`, or skip it entirely.
//! The last stage is normally [`HandlerInvocationMiddleware`], which never
//! calls `next`.

mod error_handler;
mod exactly_once;
mod handler_invocation;
mod stopwatch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::HandlerOptions;
use crate::context::HandleContext;
use crate::error::{ConfigError, HandlerError};
use crate::handler::HandlerResolver;
use crate::lock::{MessageLock, DEFAULT_LOCK_TTL};
use crate::monitor::MonitorGuard;
use crate::serialization::Message;
use crate::types::{MessageType, QueueName};

pub use error_handler::ErrorHandlerMiddleware;
pub use exactly_once::ExactlyOnceMiddleware;
pub use handler_invocation::HandlerInvocationMiddleware;
pub use stopwatch::StopwatchMiddleware;

/// One stage of a pipeline.
///
/// Returns `Ok(true)` when the message is handled and may be deleted.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        ctx: &HandleContext,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool, HandlerError>;
}

/// The remainder of a pipeline after the current stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Run the remaining stages. An exhausted chain reports "not handled".
    pub async fn run(
        self,
        ctx: &HandleContext,
        cancel: &CancellationToken,
    ) -> Result<bool, HandlerError> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(ctx, Next { stages: rest }, cancel).await,
            None => Ok(false),
        }
    }
}

/// An immutable, shareable chain of stages.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Middleware>]>,
}

impl Pipeline {
    pub async fn run(
        &self,
        ctx: &HandleContext,
        cancel: &CancellationToken,
    ) -> Result<bool, HandlerError> {
        Next {
            stages: &self.stages,
        }
        .run(ctx, cancel)
        .await
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builds a [`Pipeline`] in caller-chosen order, outermost stage first.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage inside the ones already added.
    pub fn with<T: Middleware + 'static>(self, middleware: T) -> Self {
        self.with_arc(Arc::new(middleware))
    }

    pub fn with_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.stages.push(middleware);
        self
    }

    /// Append the terminal handler stage.
    pub fn handler<M: Message>(self, resolver: Arc<dyn HandlerResolver<M>>) -> Self {
        self.with(HandlerInvocationMiddleware::new(resolver))
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages.into(),
        }
    }

    /// The standard pipeline: error handling, then the exactly-once lock
    /// when `options` ask for it, then timing, then the handler.
    pub fn default_for<M: Message>(
        resolver: Arc<dyn HandlerResolver<M>>,
        options: &HandlerOptions,
        lock: Option<Arc<dyn MessageLock>>,
        monitor: MonitorGuard,
    ) -> Result<Pipeline, ConfigError> {
        let handler_type = resolver.handler_type().to_string();
        let mut builder = Self::new().with(ErrorHandlerMiddleware::new(monitor.clone()));

        if let Some(exactly_once) = &options.exactly_once {
            let lock = lock.ok_or(ConfigError::Invalid {
                field: "exactly_once",
                reason: "requires a message lock",
            })?;
            let ttl = exactly_once.timeout.unwrap_or(DEFAULT_LOCK_TTL);
            builder = builder.with(ExactlyOnceMiddleware::new(lock, ttl));
        }

        Ok(builder
            .with(StopwatchMiddleware::new(monitor, handler_type))
            .handler(resolver)
            .build())
    }
}

/// Pipelines keyed by `(queue, message type)`.
///
/// Filled during registration, then frozen behind an `Arc` and read
/// concurrently by every worker without locking.
#[derive(Clone, Default)]
pub struct MiddlewareMap {
    pipelines: HashMap<QueueName, HashMap<MessageType, Pipeline>>,
}

impl MiddlewareMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline. A second registration for the same pair
    /// replaces the first and returns it.
    pub fn register(
        &mut self,
        queue: QueueName,
        message_type: MessageType,
        pipeline: Pipeline,
    ) -> Option<Pipeline> {
        let previous = self
            .pipelines
            .entry(queue.clone())
            .or_default()
            .insert(message_type.clone(), pipeline);
        if previous.is_some() {
            warn!(
                queue = %queue,
                message_type = %message_type,
                "pipeline registered twice; the later registration wins"
            );
        }
        previous
    }

    pub fn get(&self, queue: &QueueName, message_type: &MessageType) -> Option<&Pipeline> {
        self.pipelines.get(queue)?.get(message_type)
    }

    /// Whether any pipeline is registered for `queue`.
    pub fn has_queue(&self, queue: &QueueName) -> bool {
        self.pipelines.contains_key(queue)
    }

    pub fn queues(&self) -> impl Iterator<Item = &QueueName> {
        self.pipelines.keys()
    }

    /// Number of registered `(queue, message type)` pairs.
    pub fn len(&self) -> usize {
        self.pipelines.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
