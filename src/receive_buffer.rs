use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConsumerPoolConfig;
use crate::endpoint::QueueEndpoint;
use crate::monitor::{MessageMonitor, MonitorGuard};
use crate::telemetry::metric_inc_queue;
use crate::types::RawMessage;

/// Keeps a bounded supply of fetched messages for one queue endpoint.
///
/// The loop:
/// - Waits for room in its channel before fetching (backpressure)
/// - Fetches at most as many messages as there is room for
/// - Survives every fetch error, pausing for a fixed delay
/// - Stops between fetches once cancelled; a fetch in progress is allowed to finish
pub struct ReceiveBuffer {
    endpoint: Arc<dyn QueueEndpoint>,
    tx: mpsc::Sender<RawMessage>,
    monitor: MonitorGuard,
    batch_size: usize,
    poll_wait: Duration,
    fetch_error_delay: Duration,
}

impl ReceiveBuffer {
    /// Create a buffer and the receiving half of its channel.
    pub fn new(
        endpoint: Arc<dyn QueueEndpoint>,
        config: &ConsumerPoolConfig,
        monitor: MonitorGuard,
    ) -> (Self, mpsc::Receiver<RawMessage>) {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let buffer = Self {
            endpoint,
            tx,
            monitor,
            batch_size: config.batch_size.max(1),
            poll_wait: config.poll_wait,
            fetch_error_delay: config.fetch_error_delay,
        };
        (buffer, rx)
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run the fetch loop until cancelled or until the receiver is dropped.
    pub async fn run(self, cancel: CancellationToken) {
        let queue = self.endpoint.identity().name.clone();
        info!(queue = %queue, batch_size = self.batch_size, "receive buffer started");

        'receive: while !cancel.is_cancelled() {
            if self.tx.capacity() == 0 {
                self.monitor.on_throttled();
                metric_inc_queue("queue_bus.receive.throttled", &queue);

                let permit = tokio::select! {
                    permit = self.tx.reserve() => permit,
                    _ = cancel.cancelled() => break 'receive,
                };
                match permit {
                    // Only this loop sends, so the freed slot stays free.
                    Ok(permit) => drop(permit),
                    Err(_) => break 'receive,
                }
            }

            let max_count = self.batch_size.min(self.tx.capacity()).max(1);
            let started = Instant::now();

            match self.endpoint.fetch_messages(max_count, self.poll_wait).await {
                Ok(messages) => {
                    self.monitor.on_receive_time(started.elapsed(), &queue);
                    if !messages.is_empty() {
                        debug!(queue = %queue, count = messages.len(), "fetched messages");
                    }

                    for message in messages {
                        let sent = tokio::select! {
                            result = self.tx.send(message) => result.is_ok(),
                            _ = cancel.cancelled() => false,
                        };
                        if !sent {
                            // Unsent messages become visible again on the queue.
                            break 'receive;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        queue = %queue,
                        error = %err,
                        retry_in_ms = self.fetch_error_delay.as_millis() as u64,
                        "failed to fetch messages"
                    );
                    metric_inc_queue("queue_bus.receive.errors", &queue);
                    self.monitor.on_exception(None, &err);

                    tokio::select! {
                        _ = sleep(self.fetch_error_delay) => {}
                        _ = cancel.cancelled() => break 'receive,
                    }
                }
            }
        }

        info!(queue = %queue, "receive buffer stopped");
    }
}
