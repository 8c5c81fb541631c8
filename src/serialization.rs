use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::SerializationError;
use crate::types::MessageType;

/// A domain message that can be routed by type tag.
pub trait Message: Send + Sync + 'static {
    /// Tag carried in the envelope and used as the routing key.
    const TYPE_TAG: &'static str;

    /// Application-level id used for exactly-once locking.
    ///
    /// Falls back to the backend message id when `None`.
    fn unique_key(&self) -> Option<String> {
        None
    }

    fn message_type() -> MessageType {
        MessageType::new(Self::TYPE_TAG)
    }
}

/// Result of decoding a raw body.
#[derive(Clone)]
pub struct DeserializedMessage {
    pub message_type: MessageType,
    pub message: Arc<dyn Any + Send + Sync>,
    pub unique_key: Option<String>,

    /// String attributes carried by the envelope, such as trace headers.
    pub attributes: HashMap<String, String>,
}

/// Turns a raw message body into a typed message.
pub trait MessageSerializer: Send + Sync {
    fn deserialize(&self, body: &str) -> Result<DeserializedMessage, SerializationError>;
}

type Decoded = (Arc<dyn Any + Send + Sync>, Option<String>);
type DecodeFn = Box<dyn Fn(&str) -> Result<Decoded, serde_json::Error> + Send + Sync>;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    subject: Option<String>,
    message: String,
    #[serde(default)]
    message_attributes: HashMap<String, EnvelopeAttribute>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnvelopeAttribute {
    value: Option<String>,
}

/// Decodes notification-style JSON envelopes.
///
/// ```text
/// {"Subject": "OrderPlaced", "Message": "{\"id\":1}", "MessageAttributes": {...}}
/// ```
///
/// `Subject` selects the registered type and `Message` holds the JSON
/// payload as a string.
#[derive(Default)]
pub struct JsonEnvelopeSerializer {
    decoders: HashMap<String, DecodeFn>,
}

impl JsonEnvelopeSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` under its type tag. Registering a tag again replaces it.
    pub fn add<M>(&mut self) -> &mut Self
    where
        M: Message + DeserializeOwned,
    {
        let decode: DecodeFn = Box::new(|payload: &str| {
            let message: M = serde_json::from_str(payload)?;
            let unique_key = message.unique_key();
            Ok((Arc::new(message) as Arc<dyn Any + Send + Sync>, unique_key))
        });
        self.decoders.insert(M::TYPE_TAG.to_string(), decode);
        self
    }

    pub fn knows(&self, message_type: &MessageType) -> bool {
        self.decoders.contains_key(message_type.as_str())
    }
}

impl MessageSerializer for JsonEnvelopeSerializer {
    fn deserialize(&self, body: &str) -> Result<DeserializedMessage, SerializationError> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|e| SerializationError::Malformed(e.to_string()))?;

        let tag = envelope
            .subject
            .filter(|s| !s.is_empty())
            .ok_or(SerializationError::MissingTypeTag)?;
        let message_type = MessageType(tag);

        let decode = self
            .decoders
            .get(message_type.as_str())
            .ok_or_else(|| SerializationError::UnknownMessageType(message_type.clone()))?;

        let (message, unique_key) = decode(&envelope.message)
            .map_err(|e| SerializationError::Malformed(e.to_string()))?;

        let attributes = envelope
            .message_attributes
            .into_iter()
            .filter_map(|(name, attr)| attr.value.map(|value| (name, value)))
            .collect();

        Ok(DeserializedMessage {
            message_type,
            message,
            unique_key,
            attributes,
        })
    }
}
