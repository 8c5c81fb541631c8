use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::endpoint::QueueEndpoint;
use crate::types::{RawMessage, ReceivedMessage};

struct Source {
    endpoint: Arc<dyn QueueEndpoint>,
    rx: mpsc::Receiver<RawMessage>,
}

/// Fans several receive-buffer channels into one bounded channel.
///
/// Every source gets its own forwarding task, so no source can be starved
/// by a busier one. Order across sources is whatever the scheduler yields.
/// The output is bounded, so a slow consumer stalls the forwarders and,
/// through their bounded inputs, the receive buffers.
pub struct Multiplexer {
    sources: Vec<Source>,
    tx: mpsc::Sender<ReceivedMessage>,
}

impl Multiplexer {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReceivedMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let multiplexer = Self {
            sources: Vec::new(),
            tx,
        };
        (multiplexer, rx)
    }

    /// Add a source. Messages read from `rx` are tagged with `endpoint`.
    pub fn add_source(&mut self, endpoint: Arc<dyn QueueEndpoint>, rx: mpsc::Receiver<RawMessage>) {
        self.sources.push(Source { endpoint, rx });
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Start forwarding. The returned task ends once every source is
    /// exhausted or cancellation is observed; the output channel closes
    /// with it.
    pub fn run(self, cancel: CancellationToken) -> JoinHandle<()> {
        let Multiplexer { sources, tx } = self;

        let forwarders: Vec<JoinHandle<()>> = sources
            .into_iter()
            .map(|source| tokio::spawn(forward(source, tx.clone(), cancel.clone())))
            .collect();
        drop(tx);

        tokio::spawn(async move {
            for result in join_all(forwarders).await {
                if let Err(err) = result {
                    warn!(error = %err, "multiplexer forwarder ended abnormally");
                }
            }
            debug!("multiplexer stopped");
        })
    }
}

async fn forward(
    mut source: Source,
    tx: mpsc::Sender<ReceivedMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            message = source.rx.recv() => message,
            _ = cancel.cancelled() => None,
        };
        let Some(message) = message else { break };

        let received = ReceivedMessage {
            endpoint: source.endpoint.clone(),
            message,
        };
        let sent = tokio::select! {
            result = tx.send(received) => result.is_ok(),
            _ = cancel.cancelled() => false,
        };
        if !sent {
            break;
        }
    }
}
