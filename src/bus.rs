use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::{BackoffPolicy, BackoffStrategy, FixedBackoff};
use crate::config::{ConsumerPoolConfig, HandlerOptions};
use crate::dispatcher::MessageDispatcher;
use crate::endpoint::QueueEndpoint;
use crate::error::BusError;
use crate::handler::{Handler, HandlerResolver, StaticResolver};
use crate::lock::MessageLock;
use crate::middleware::{MiddlewareMap, Pipeline, PipelineBuilder};
use crate::monitor::{MessageMonitor, MonitorGuard, NullMonitor};
use crate::multiplexer::Multiplexer;
use crate::receive_buffer::ReceiveBuffer;
use crate::serialization::{JsonEnvelopeSerializer, Message, MessageSerializer};
use crate::types::{MessageType, QueueName};
use crate::worker::{ConsumerPool, ShutdownReason};

/// Registration surface and entry point of the consumption engine.
///
/// Add queues and register pipelines, then call [`MessageBus::start`].
/// Starting consumes the bus; the registrations are frozen from then on.
pub struct MessageBus {
    config: ConsumerPoolConfig,
    endpoints: Vec<Arc<dyn QueueEndpoint>>,
    middleware: MiddlewareMap,
    serializer: JsonEnvelopeSerializer,
    custom_serializer: Option<Arc<dyn MessageSerializer>>,
    lock: Option<Arc<dyn MessageLock>>,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    monitor: MonitorGuard,
}

impl MessageBus {
    pub fn new(config: ConsumerPoolConfig) -> Result<Self, BusError> {
        config.validate()?;
        Ok(Self {
            config,
            endpoints: Vec::new(),
            middleware: MiddlewareMap::new(),
            serializer: JsonEnvelopeSerializer::new(),
            custom_serializer: None,
            lock: None,
            backoff: None,
            monitor: MonitorGuard::new(Arc::new(NullMonitor)),
        })
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MessageMonitor>) -> Self {
        self.monitor = MonitorGuard::new(monitor);
        self
    }

    /// Lock store for exactly-once handlers. Must be set before registering them.
    pub fn with_message_lock(mut self, lock: Arc<dyn MessageLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Replace the built-in JSON envelope serializer.
    pub fn with_serializer(mut self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.custom_serializer = Some(serializer);
        self
    }

    /// Replace the default fixed backoff.
    pub fn with_backoff_strategy(mut self, strategy: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = Some(strategy);
        self
    }

    /// The monitor wrapper, for building custom pipelines.
    pub fn monitor(&self) -> MonitorGuard {
        self.monitor.clone()
    }

    pub fn config(&self) -> &ConsumerPoolConfig {
        &self.config
    }

    /// Consume messages from `endpoint`.
    pub fn add_queue(&mut self, endpoint: Arc<dyn QueueEndpoint>) -> &mut Self {
        let name = &endpoint.identity().name;
        if self.endpoints.iter().any(|e| &e.identity().name == name) {
            warn!(queue = %name, "queue added twice; both endpoints will be polled");
        }
        self.endpoints.push(endpoint);
        self
    }

    /// Make `M` known to the built-in serializer without registering a handler.
    pub fn add_message_type<M>(&mut self) -> &mut Self
    where
        M: Message + serde::de::DeserializeOwned,
    {
        self.serializer.add::<M>();
        self
    }

    /// Register a ready-made pipeline. A later registration for the same
    /// queue and type replaces this one.
    pub fn register(
        &mut self,
        queue: QueueName,
        message_type: MessageType,
        pipeline: Pipeline,
    ) -> &mut Self {
        self.middleware.register(queue, message_type, pipeline);
        self
    }

    /// Register `handler` for `M` on `queue` behind the default pipeline.
    pub fn register_handler<M, H>(
        &mut self,
        queue: QueueName,
        handler: H,
        options: HandlerOptions,
    ) -> Result<&mut Self, BusError>
    where
        M: Message + serde::de::DeserializeOwned,
        H: Handler<M> + 'static,
    {
        self.register_resolver::<M>(queue, Arc::new(StaticResolver::new(handler)), options)
    }

    /// Register a handler resolver for `M` on `queue` behind the default pipeline.
    pub fn register_resolver<M>(
        &mut self,
        queue: QueueName,
        resolver: Arc<dyn HandlerResolver<M>>,
        options: HandlerOptions,
    ) -> Result<&mut Self, BusError>
    where
        M: Message + serde::de::DeserializeOwned,
    {
        let pipeline =
            PipelineBuilder::default_for(resolver, &options, self.lock.clone(), self.monitor.clone())?;
        self.serializer.add::<M>();
        Ok(self.register(queue, M::message_type(), pipeline))
    }

    /// Start polling every queue and dispatching to the pool.
    ///
    /// Cancelling `cancel` (or calling [`BusHandle::cancel`]) begins a
    /// graceful shutdown; [`BusHandle::completion`] resolves once it is done.
    pub fn start(self, cancel: CancellationToken) -> Result<BusHandle, BusError> {
        if self.endpoints.is_empty() {
            return Err(BusError::NoQueues);
        }
        for queue in self.middleware.queues() {
            if !self.endpoints.iter().any(|e| &e.identity().name == queue) {
                return Err(BusError::UnknownQueue(queue.clone()));
            }
        }

        let serializer: Arc<dyn MessageSerializer> = match self.custom_serializer {
            Some(serializer) => serializer,
            None => Arc::new(self.serializer),
        };
        let strategy: Arc<dyn BackoffStrategy> = match self.backoff {
            Some(strategy) => strategy,
            None => Arc::new(FixedBackoff::new(self.config.default_visibility_timeout)),
        };
        let dispatcher = Arc::new(
            MessageDispatcher::new(serializer, Arc::new(self.middleware), self.monitor.clone())
                .with_backoff(BackoffPolicy::new(strategy, self.config.max_retries)),
        );

        let (mut multiplexer, work_rx) = Multiplexer::new(self.config.multiplexer_capacity);
        let mut buffers = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let (buffer, rx) = ReceiveBuffer::new(endpoint.clone(), &self.config, self.monitor.clone());
            multiplexer.add_source(endpoint.clone(), rx);
            buffers.push(buffer.spawn(cancel.clone()));
        }
        let multiplexer = multiplexer.run(cancel.clone());

        let worker_count = self.config.effective_worker_count();
        let pool = ConsumerPool::new(work_rx, dispatcher, self.monitor.clone(), worker_count);
        let pool = tokio::spawn(pool.run(cancel.clone()));

        info!(
            queues = self.endpoints.len(),
            workers = worker_count,
            "message bus started"
        );

        Ok(BusHandle {
            cancel,
            pool,
            multiplexer,
            buffers,
        })
    }
}

/// Handle to a running bus.
pub struct BusHandle {
    cancel: CancellationToken,
    pool: JoinHandle<Result<ShutdownReason, BusError>>,
    multiplexer: JoinHandle<()>,
    buffers: Vec<JoinHandle<()>>,
}

impl BusHandle {
    /// Request a graceful shutdown.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until every worker has drained and every background task has stopped.
    ///
    /// Resolves to [`ShutdownReason::Cancelled`] after a requested shutdown.
    pub async fn completion(self) -> Result<ShutdownReason, BusError> {
        let outcome = match self.pool.await {
            Ok(outcome) => outcome,
            Err(err) => Err(BusError::WorkerFailed(err.to_string())),
        };

        // The pool has dropped its receiver, so the remaining tasks wind down
        // even without cancellation. Receive buffers finish any fetch in progress.
        if let Err(err) = self.multiplexer.await {
            warn!(error = %err, "multiplexer task failed");
        }
        for result in join_all(self.buffers).await {
            if let Err(err) = result {
                warn!(error = %err, "receive buffer task failed");
            }
        }

        info!("message bus stopped");
        outcome
    }
}
