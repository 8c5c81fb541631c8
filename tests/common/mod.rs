#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use queue_bus::{
    CancellationToken, DiscardReason, Handler, HandlerError, InMemoryMessageLock, LockError,
    LockKey, LockResponse, MessageLock, MessageMonitor, MessageType, QueueEndpoint, QueueError,
    QueueIdentity, QueueName, RawMessage, ReceiptHandle,
};

#[derive(Debug, Clone, Deserialize)]
pub struct OrderPlaced {
    pub order_id: u64,
}

impl queue_bus::Message for OrderPlaced {
    const TYPE_TAG: &'static str = "OrderPlaced";
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderShipped {
    pub order_id: u64,
}

impl queue_bus::Message for OrderShipped {
    const TYPE_TAG: &'static str = "OrderShipped";
}

/// Notification envelope with a JSON payload encoded as a string.
pub fn envelope(subject: &str, payload: &str) -> String {
    serde_json::json!({ "Subject": subject, "Message": payload }).to_string()
}

pub fn order_placed(order_id: u64) -> String {
    envelope("OrderPlaced", &format!(r#"{{"order_id":{}}}"#, order_id))
}

/// Endpoint that serves scripted batches once, then nothing, and records
/// every delete and visibility change.
pub struct ScriptedEndpoint {
    identity: QueueIdentity,
    batches: Mutex<VecDeque<Vec<RawMessage>>>,
    pub fetches: AtomicUsize,
    pub deletes: Mutex<Vec<ReceiptHandle>>,
    pub visibility_changes: Mutex<Vec<(ReceiptHandle, Duration)>>,
    pub fail_deletes: AtomicBool,
}

impl ScriptedEndpoint {
    pub fn new(name: &str) -> Self {
        Self {
            identity: QueueIdentity::from_name(name),
            batches: Mutex::new(VecDeque::new()),
            fetches: AtomicUsize::new(0),
            deletes: Mutex::new(Vec::new()),
            visibility_changes: Mutex::new(Vec::new()),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn with_batch(self, batch: Vec<RawMessage>) -> Self {
        self.batches.lock().unwrap().push_back(batch);
        self
    }

    pub fn deleted(&self) -> Vec<ReceiptHandle> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn delete_count_for(&self, receipt: &str) -> usize {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.0 == receipt)
            .count()
    }

    pub fn visibility_changed(&self) -> Vec<(ReceiptHandle, Duration)> {
        self.visibility_changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueEndpoint for ScriptedEndpoint {
    fn identity(&self) -> &QueueIdentity {
        &self.identity
    }

    async fn fetch_messages(
        &self,
        max_count: usize,
        wait_time: Duration,
    ) -> Result<Vec<RawMessage>, QueueError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let batch = self.batches.lock().unwrap().pop_front();
        match batch {
            Some(mut batch) => {
                batch.truncate(max_count.max(1));
                Ok(batch)
            }
            None => {
                tokio::time::sleep(wait_time).await;
                Ok(Vec::new())
            }
        }
    }

    async fn delete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(QueueError::Transport("delete refused".to_string()));
        }
        self.deletes.lock().unwrap().push(receipt.clone());
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        self.visibility_changes
            .lock()
            .unwrap()
            .push((receipt.clone(), timeout));
        Ok(())
    }
}

/// Endpoint whose every fetch fails.
pub struct FailingEndpoint {
    identity: QueueIdentity,
    pub fetches: AtomicUsize,
}

impl FailingEndpoint {
    pub fn new(name: &str) -> Self {
        Self {
            identity: QueueIdentity::from_name(name),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QueueEndpoint for FailingEndpoint {
    fn identity(&self) -> &QueueIdentity {
        &self.identity
    }

    async fn fetch_messages(
        &self,
        _max_count: usize,
        _wait_time: Duration,
    ) -> Result<Vec<RawMessage>, QueueError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Err(QueueError::Transport("backend unavailable".to_string()))
    }

    async fn delete_message(&self, _receipt: &ReceiptHandle) -> Result<(), QueueError> {
        Err(QueueError::Transport("backend unavailable".to_string()))
    }

    async fn change_visibility(
        &self,
        _receipt: &ReceiptHandle,
        _timeout: Duration,
    ) -> Result<(), QueueError> {
        Err(QueueError::Transport("backend unavailable".to_string()))
    }
}

/// Endpoint that always has another message ready.
pub struct EndlessEndpoint {
    identity: QueueIdentity,
    pub fetches: AtomicUsize,
    pub served: AtomicUsize,
}

impl EndlessEndpoint {
    pub fn new(name: &str) -> Self {
        Self {
            identity: QueueIdentity::from_name(name),
            fetches: AtomicUsize::new(0),
            served: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QueueEndpoint for EndlessEndpoint {
    fn identity(&self) -> &QueueIdentity {
        &self.identity
    }

    async fn fetch_messages(
        &self,
        max_count: usize,
        _wait_time: Duration,
    ) -> Result<Vec<RawMessage>, QueueError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let batch = (0..max_count)
            .map(|_| {
                let n = self.served.fetch_add(1, Ordering::SeqCst);
                RawMessage::new(format!("m{}", n), format!("r{}", n), order_placed(n as u64))
            })
            .collect();
        Ok(batch)
    }

    async fn delete_message(&self, _receipt: &ReceiptHandle) -> Result<(), QueueError> {
        Ok(())
    }

    async fn change_visibility(
        &self,
        _receipt: &ReceiptHandle,
        _timeout: Duration,
    ) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMonitor {
    pub receive_times: Mutex<Vec<Duration>>,
    pub handle_times: Mutex<Vec<(Duration, String, MessageType)>>,
    pub exceptions: Mutex<Vec<(Option<MessageType>, String)>>,
    pub throttled: AtomicUsize,
    pub discarded: Mutex<Vec<(QueueName, Option<MessageType>, DiscardReason)>>,
}

impl RecordingMonitor {
    pub fn handle_time_count(&self) -> usize {
        self.handle_times.lock().unwrap().len()
    }

    pub fn exception_count(&self) -> usize {
        self.exceptions.lock().unwrap().len()
    }

    pub fn discard_reasons(&self) -> Vec<DiscardReason> {
        self.discarded
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, reason)| *reason)
            .collect()
    }
}

impl MessageMonitor for RecordingMonitor {
    fn on_receive_time(&self, duration: Duration, _queue: &QueueName) {
        self.receive_times.lock().unwrap().push(duration);
    }

    fn on_handle_time(&self, duration: Duration, handler_type: &str, message_type: &MessageType) {
        self.handle_times
            .lock()
            .unwrap()
            .push((duration, handler_type.to_string(), message_type.clone()));
    }

    fn on_exception(&self, message_type: Option<&MessageType>, error: &dyn std::error::Error) {
        self.exceptions
            .lock()
            .unwrap()
            .push((message_type.cloned(), error.to_string()));
    }

    fn on_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::SeqCst);
    }

    fn on_discarded(&self, queue: &QueueName, message_type: Option<&MessageType>, reason: DiscardReason) {
        self.discarded
            .lock()
            .unwrap()
            .push((queue.clone(), message_type.cloned(), reason));
    }
}

/// Monitor that panics on every call.
pub struct PanickingMonitor;

impl MessageMonitor for PanickingMonitor {
    fn on_receive_time(&self, _duration: Duration, _queue: &QueueName) {
        panic!("monitor exploded");
    }

    fn on_handle_time(&self, _duration: Duration, _handler_type: &str, _message_type: &MessageType) {
        panic!("monitor exploded");
    }

    fn on_exception(&self, _message_type: Option<&MessageType>, _error: &dyn std::error::Error) {
        panic!("monitor exploded");
    }

    fn on_throttled(&self) {
        panic!("monitor exploded");
    }
}

/// In-memory lock that records every acquisition attempt.
#[derive(Default)]
pub struct RecordingLock {
    pub inner: InMemoryMessageLock,
    pub attempts: Mutex<Vec<(LockKey, Duration)>>,
    pub releases: Mutex<Vec<LockKey>>,
}

#[async_trait]
impl MessageLock for RecordingLock {
    async fn try_acquire(&self, key: &LockKey, ttl: Duration) -> Result<LockResponse, LockError> {
        self.attempts.lock().unwrap().push((key.clone(), ttl));
        self.inner.try_acquire(key, ttl).await
    }

    async fn release(&self, key: &LockKey) -> Result<(), LockError> {
        self.releases.lock().unwrap().push(key.clone());
        self.inner.release(key).await
    }
}

/// Handler returning a fixed result and counting its calls.
#[derive(Clone)]
pub struct CountingHandler {
    pub result: bool,
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl CountingHandler {
    pub fn returning(result: bool) -> Self {
        Self {
            result,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_millis(1),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<M: queue_bus::Message> Handler<M> for CountingHandler {
    async fn handle(&self, _message: &M, _cancel: &CancellationToken) -> Result<bool, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.result)
    }
}

/// Handler that fails with an error.
#[derive(Clone, Default)]
pub struct FailingHandler {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<OrderPlaced> for FailingHandler {
    async fn handle(&self, message: &OrderPlaced, _cancel: &CancellationToken) -> Result<bool, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(format!("cannot place order {}", message.order_id).into())
    }
}

/// Handler that panics for one order id and succeeds for the rest.
#[derive(Clone)]
pub struct PanicOnOrder {
    pub poison_id: u64,
    pub handled: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<OrderPlaced> for PanicOnOrder {
    async fn handle(&self, message: &OrderPlaced, _cancel: &CancellationToken) -> Result<bool, HandlerError> {
        if message.order_id == self.poison_id {
            panic!("handler bug for order {}", message.order_id);
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Handler that panics on its first call and succeeds on every later one.
#[derive(Clone, Default)]
pub struct PanicsOnce {
    pub calls: Arc<AtomicUsize>,
}

impl PanicsOnce {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<M: queue_bus::Message> Handler<M> for PanicsOnce {
    async fn handle(&self, _message: &M, _cancel: &CancellationToken) -> Result<bool, HandlerError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("first delivery blew up");
        }
        Ok(true)
    }
}
