use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::QueueEndpoint;
use crate::error::QueueError;
use crate::serialization::DeserializedMessage;
use crate::types::{MessageType, QueueName, RawMessage, ReceiptHandle};

/// Operations a pipeline stage may perform on the message it is processing.
#[derive(Clone)]
pub struct MessageActions {
    endpoint: Arc<dyn QueueEndpoint>,
    receipt: ReceiptHandle,
}

impl MessageActions {
    pub fn new(endpoint: Arc<dyn QueueEndpoint>, receipt: ReceiptHandle) -> Self {
        Self { endpoint, receipt }
    }

    pub async fn update_visibility(&self, timeout: Duration) -> Result<(), QueueError> {
        self.endpoint.change_visibility(&self.receipt, timeout).await
    }

    pub async fn delete(&self) -> Result<(), QueueError> {
        self.endpoint.delete_message(&self.receipt).await
    }
}

/// Per-message working record passed down the middleware pipeline.
///
/// Created by the dispatcher for exactly one dispatch and dropped when the
/// pipeline returns. Never shared between workers.
pub struct HandleContext {
    pub queue: QueueName,
    pub raw: RawMessage,
    pub message_type: MessageType,
    pub actions: MessageActions,

    /// Envelope attributes, e.g. propagated trace headers.
    pub attributes: HashMap<String, String>,

    message: Arc<dyn Any + Send + Sync>,
    unique_key: Option<String>,
}

impl HandleContext {
    pub fn new(
        queue: QueueName,
        raw: RawMessage,
        deserialized: DeserializedMessage,
        actions: MessageActions,
    ) -> Self {
        Self {
            queue,
            raw,
            message_type: deserialized.message_type,
            actions,
            attributes: deserialized.attributes,
            message: deserialized.message,
            unique_key: deserialized.unique_key,
        }
    }

    /// The typed message, if it is an `M`.
    pub fn message<M: 'static>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// Id used to recognise redeliveries of this message.
    ///
    /// The application key when the message provides one, else the backend id.
    pub fn message_id(&self) -> &str {
        self.unique_key.as_deref().unwrap_or(&self.raw.id.0)
    }

    pub fn receive_count(&self) -> u32 {
        self.raw.attributes.approximate_receive_count
    }
}
