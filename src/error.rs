use std::fmt;

use crate::types::{MessageType, QueueName};

/// Error raised by an application handler.
///
/// Returning an error is equivalent to returning `Ok(false)` as far as
/// acknowledgement goes, but it is logged and reported separately.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by a queue endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The backend call failed. Transient unless proven otherwise.
    Transport(String),

    /// The receipt handle is unknown or no longer valid.
    ReceiptExpired,

    /// The endpoint has been closed.
    Closed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Transport(reason) =>
                write!(f, "queue transport error: {}", reason),
            QueueError::ReceiptExpired =>
                write!(f, "receipt handle expired or unknown"),
            QueueError::Closed =>
                write!(f, "queue endpoint is closed"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Reasons a message body could not be turned into a typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// The envelope names a type nobody registered.
    UnknownMessageType(MessageType),

    /// The envelope carries no type tag at all.
    MissingTypeTag,

    /// The body or the inner payload is not valid.
    Malformed(String),
}

impl SerializationError {
    /// Whether the failure is due to routing rather than payload content.
    pub fn is_unroutable(&self) -> bool {
        matches!(
            self,
            SerializationError::UnknownMessageType(_) | SerializationError::MissingTypeTag
        )
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::UnknownMessageType(tag) =>
                write!(f, "no serializer registered for message type {}", tag),
            SerializationError::MissingTypeTag =>
                write!(f, "message envelope has no type tag"),
            SerializationError::Malformed(reason) =>
                write!(f, "malformed message body: {}", reason),
        }
    }
}

impl std::error::Error for SerializationError {}

/// Errors raised by the engine's own pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The context holds a different message type than the stage expects.
    TypeMismatch {
        expected: &'static str,
        actual: MessageType,
    },

    /// The resolver returned no handler for this message.
    NoHandlerResolved(MessageType),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::TypeMismatch { expected, actual } =>
                write!(f, "pipeline for {} received a {} message", expected, actual),
            PipelineError::NoHandlerResolved(message_type) =>
                write!(f, "no handler resolved for message type {}", message_type),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Errors returned by a message lock store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    Backend(String),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::Backend(reason) =>
                write!(f, "lock store error: {}", reason),
        }
    }
}

impl std::error::Error for LockError {}

/// Invalid consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    /// Configuration document could not be parsed.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { field, reason } =>
                write!(f, "invalid configuration for {}: {}", field, reason),
            ConfigError::Parse(reason) =>
                write!(f, "could not parse configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors returned when starting or awaiting the bus.
#[derive(Debug)]
pub enum BusError {
    /// No queues were added before `start`.
    NoQueues,

    /// A background task ended abnormally.
    WorkerFailed(String),

    Config(ConfigError),

    /// A pipeline was registered for a queue the bus does not consume.
    UnknownQueue(QueueName),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::NoQueues =>
                write!(f, "message bus has no queues to consume"),
            BusError::WorkerFailed(reason) =>
                write!(f, "background task failed: {}", reason),
            BusError::Config(err) =>
                write!(f, "{}", err),
            BusError::UnknownQueue(queue) =>
                write!(f, "no endpoint added for queue {}", queue),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for BusError {
    fn from(err: ConfigError) -> Self {
        BusError::Config(err)
    }
}
