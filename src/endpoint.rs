use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};

use crate::error::QueueError;
use crate::types::{MessageAttributes, MessageId, QueueIdentity, RawMessage, ReceiptHandle};

/// A pollable source of raw messages.
///
/// This is the only seam between the engine and a queue backend.
/// Wire protocol, authentication and provisioning all live behind it.
#[async_trait]
pub trait QueueEndpoint: Send + Sync {
    /// Stable identity of the queue.
    fn identity(&self) -> &QueueIdentity;

    /// Fetch up to `max_count` messages, waiting at most `wait_time` for any to arrive.
    ///
    /// An empty batch is a normal result.
    async fn fetch_messages(
        &self,
        max_count: usize,
        wait_time: Duration,
    ) -> Result<Vec<RawMessage>, QueueError>;

    async fn delete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Make the message invisible for `timeout` from now.
    async fn change_visibility(
        &self,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError>;
}

#[derive(Debug)]
struct StoredMessage {
    id: MessageId,
    body: String,
    sent_timestamp_ms: u64,
    receive_count: u32,
    receipt: Option<ReceiptHandle>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

/// In-process queue with visibility-timeout semantics.
///
/// Received messages become invisible for the queue's visibility timeout
/// and reappear unless deleted first. Suitable for tests and for embedding
/// the engine without a broker.
pub struct InMemoryQueue {
    identity: QueueIdentity,
    visibility_timeout: Duration,
    messages: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
    next_id: AtomicU64,
    next_receipt: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryQueue {
    /// Create an empty queue with a 30 second visibility timeout.
    pub fn new(identity: QueueIdentity) -> Self {
        Self {
            identity,
            visibility_timeout: Duration::from_secs(30),
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            next_receipt: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Enqueue a body and return the id assigned to it.
    pub async fn send(&self, body: impl Into<String>) -> MessageId {
        let id = MessageId(format!(
            "{}-{}",
            self.identity.name,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        self.send_with_id(id.clone(), body).await;
        id
    }

    /// Enqueue a body under a caller-chosen id.
    pub async fn send_with_id(&self, id: MessageId, body: impl Into<String>) {
        let sent_timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.messages.lock().await.push_back(StoredMessage {
            id,
            body: body.into(),
            sent_timestamp_ms,
            receive_count: 0,
            receipt: None,
            invisible_until: None,
        });
        self.notify.notify_waiters();
    }

    /// Messages currently stored, visible or not.
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages received but neither deleted nor visible again yet.
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| !m.is_visible(now))
            .count()
    }

    /// Reject every later call with [`QueueError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    fn take_visible(
        &self,
        messages: &mut VecDeque<StoredMessage>,
        max_count: usize,
        now: Instant,
    ) -> Vec<RawMessage> {
        let mut batch = Vec::new();
        for stored in messages.iter_mut() {
            if batch.len() >= max_count {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }
            let receipt = ReceiptHandle(format!(
                "{}#{}",
                stored.id,
                self.next_receipt.fetch_add(1, Ordering::Relaxed)
            ));
            stored.receive_count += 1;
            stored.receipt = Some(receipt.clone());
            stored.invisible_until = Some(now + self.visibility_timeout);
            batch.push(RawMessage {
                id: stored.id.clone(),
                receipt_handle: receipt,
                body: stored.body.clone(),
                attributes: MessageAttributes {
                    approximate_receive_count: stored.receive_count,
                    sent_timestamp_ms: Some(stored.sent_timestamp_ms),
                    extra: Default::default(),
                },
            });
        }
        batch
    }
}

#[async_trait]
impl QueueEndpoint for InMemoryQueue {
    fn identity(&self) -> &QueueIdentity {
        &self.identity
    }

    async fn fetch_messages(
        &self,
        max_count: usize,
        wait_time: Duration,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let deadline = Instant::now() + wait_time;

        loop {
            // Register interest before inspecting the queue so a concurrent
            // send between the check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;

            let now = Instant::now();
            let wake_at = {
                let mut messages = self.messages.lock().await;
                let batch = self.take_visible(&mut messages, max_count, now);
                if !batch.is_empty() {
                    return Ok(batch);
                }
                messages
                    .iter()
                    .filter_map(|m| m.invisible_until)
                    .min()
                    .map_or(deadline, |next| next.min(deadline))
            };

            if now >= deadline {
                return Ok(Vec::new());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.ensure_open()?;
        let mut messages = self.messages.lock().await;
        let index = messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt))
            .ok_or(QueueError::ReceiptExpired)?;
        messages.remove(index);
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        self.ensure_open()?;
        {
            let mut messages = self.messages.lock().await;
            let stored = messages
                .iter_mut()
                .find(|m| m.receipt.as_ref() == Some(receipt))
                .ok_or(QueueError::ReceiptExpired)?;
            stored.invisible_until = Some(Instant::now() + timeout);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
