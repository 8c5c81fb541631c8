use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::MessageDispatcher;
use crate::error::BusError;
use crate::monitor::{MessageMonitor, MonitorGuard};
use crate::telemetry::metric_inc;
use crate::types::ReceivedMessage;

/// Why the pool stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Cancellation was requested and every in-flight dispatch finished.
    Cancelled,

    /// Every message source closed without cancellation.
    SourcesClosed,
}

/// Fixed-size set of workers draining one shared channel.
pub struct ConsumerPool {
    rx: Arc<Mutex<mpsc::Receiver<ReceivedMessage>>>,
    dispatcher: Arc<MessageDispatcher>,
    monitor: MonitorGuard,
    worker_count: usize,
}

impl ConsumerPool {
    pub fn new(
        rx: mpsc::Receiver<ReceivedMessage>,
        dispatcher: Arc<MessageDispatcher>,
        monitor: MonitorGuard,
        worker_count: usize,
    ) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
            dispatcher,
            monitor,
            worker_count: worker_count.max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run the workers until cancelled or until the channel closes.
    ///
    /// Resolves only after every worker has finished its current dispatch.
    /// A worker task that ends abnormally is reported as
    /// [`BusError::WorkerFailed`] once the rest have drained.
    pub async fn run(self, cancel: CancellationToken) -> Result<ShutdownReason, BusError> {
        info!(workers = self.worker_count, "consumer pool started");

        let mut workers = JoinSet::new();
        for worker_id in 0..self.worker_count {
            workers.spawn(worker_loop(
                worker_id,
                self.rx.clone(),
                self.dispatcher.clone(),
                self.monitor.clone(),
                cancel.clone(),
            ));
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "consumer worker ended abnormally");
                failure.get_or_insert_with(|| err.to_string());
            }
        }

        info!("consumer pool stopped");

        if let Some(reason) = failure {
            return Err(BusError::WorkerFailed(reason));
        }
        if cancel.is_cancelled() {
            Ok(ShutdownReason::Cancelled)
        } else {
            Ok(ShutdownReason::SourcesClosed)
        }
    }
}

/// Main worker loop.
///
/// Each worker:
/// - Pulls one message from the shared channel
/// - Dispatches it and waits for the outcome
/// - Survives a panicking dispatch and keeps looping
/// - Stops taking work once cancelled, never mid-dispatch
async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<ReceivedMessage>>>,
    dispatcher: Arc<MessageDispatcher>,
    monitor: MonitorGuard,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            received = async { rx.lock().await.recv().await } => received,
        };

        let Some(received) = received else { break };

        let queue = received.endpoint.identity().name.clone();
        let message_id = received.message.id.clone();

        let outcome = AssertUnwindSafe(dispatcher.dispatch(received, &cancel))
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            let reason = panic_message(&*panic);
            error!(
                worker = worker_id,
                queue = %queue,
                message_id = %message_id,
                panic = %reason,
                "dispatch panicked, worker continues"
            );
            metric_inc("queue_bus.worker.panics");
            monitor.on_exception(None, &BusError::WorkerFailed(reason));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
