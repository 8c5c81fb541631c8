use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use queue_bus::{
    CancellationToken, ConsumerPoolConfig, Handler, HandlerError, HandlerOptions,
    InMemoryMessageLock, InMemoryQueue, Message, MessageBus, QueueIdentity, QueueName,
    TracingMonitor,
};

#[derive(Debug, Deserialize)]
struct OrderPlaced {
    order_id: u64,
}

impl Message for OrderPlaced {
    const TYPE_TAG: &'static str = "OrderPlaced";
}

struct OrderPlacedHandler;

#[async_trait]
impl Handler<OrderPlaced> for OrderPlacedHandler {
    async fn handle(&self, message: &OrderPlaced, _cancel: &CancellationToken) -> Result<bool, HandlerError> {
        tracing::info!(order_id = message.order_id, "order placed");
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let queue = Arc::new(InMemoryQueue::new(QueueIdentity::from_name("orders")));
    for order_id in 1..=3 {
        let payload = format!(r#"{{"order_id":{}}}"#, order_id);
        let body = serde_json::json!({ "Subject": "OrderPlaced", "Message": payload });
        queue.send(body.to_string()).await;
    }

    let config = ConsumerPoolConfig::default()
        .with_worker_count(4)
        .with_poll_wait(Duration::from_secs(1));

    let mut bus = MessageBus::new(config)?
        .with_monitor(Arc::new(TracingMonitor))
        .with_message_lock(Arc::new(InMemoryMessageLock::new()));
    bus.add_queue(queue.clone());
    bus.register_handler::<OrderPlaced, _>(
        QueueName::new("orders"),
        OrderPlacedHandler,
        HandlerOptions::new().exactly_once(None),
    )?;

    let handle = bus.start(CancellationToken::new())?;

    while !queue.is_empty().await {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    handle.cancel();
    let reason = handle.completion().await?;
    tracing::info!(?reason, "done");
    Ok(())
}
