use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::endpoint::QueueEndpoint;

/// Logical name of a queue.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of queue names with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(pub String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-assigned identifier of a message.
///
/// Stable across redeliveries of the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token required to delete a message or change its visibility.
///
/// Unlike [`MessageId`], a new receipt handle is issued on every receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(pub String);

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable type tag used to route a message to its pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageType(pub String);

impl MessageType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a queue endpoint.
///
/// Queues can be addressed by bare name or by full URL; both forms
/// resolve to the same identity type so the rest of the engine never
/// cares which one the caller started from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueIdentity {
    /// Logical queue name, used for pipeline lookup and lock keys.
    pub name: QueueName,

    /// Fully qualified address of the queue.
    pub uri: String,
}

impl QueueIdentity {
    /// Identity for a queue known only by name.
    ///
    /// The URI is synthesized as `queue://<name>`.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uri: format!("queue://{}", name),
            name: QueueName(name),
        }
    }

    /// Identity for a queue known by URL.
    ///
    /// The name is the last non-empty path segment of the URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        let uri = url.into();
        let name = uri
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            name: QueueName(name),
            uri,
        }
    }
}

/// Delivery attributes attached by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageAttributes {
    /// How many times the backend has handed this message out, this receive included.
    pub approximate_receive_count: u32,

    /// When the message was originally sent, in milliseconds since the Unix epoch.
    pub sent_timestamp_ms: Option<u64>,

    /// Any other backend attributes.
    pub extra: HashMap<String, String>,
}

/// Opaque envelope fetched from a queue endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    pub attributes: MessageAttributes,
}

impl RawMessage {
    pub fn new(
        id: impl Into<String>,
        receipt_handle: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId(id.into()),
            receipt_handle: ReceiptHandle(receipt_handle.into()),
            body: body.into(),
            attributes: MessageAttributes::default(),
        }
    }

    /// Set the receive count attribute.
    pub fn with_receive_count(mut self, count: u32) -> Self {
        self.attributes.approximate_receive_count = count;
        self
    }
}

/// A raw message tagged with the endpoint it came from.
///
/// This is the unit of work consumed by the pool.
#[derive(Clone)]
pub struct ReceivedMessage {
    pub endpoint: Arc<dyn QueueEndpoint>,
    pub message: RawMessage,
}

impl fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("queue", &self.endpoint.identity().name)
            .field("message", &self.message)
            .finish()
    }
}
