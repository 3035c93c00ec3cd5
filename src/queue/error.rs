//! Queue Error Types

use crate::broker::BrokerError;

/// Payload could not be converted into the message value type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to decode payload: {message}")]
pub struct DecodeError {
    pub message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Key function rejected a decoded message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to derive key: {message}")]
pub struct KeyDerivationError {
    pub message: String,
}

impl KeyDerivationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Value could not be converted into a payload for publishing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to encode value: {message}")]
pub struct EncodeError {
    pub message: String,
}

impl EncodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Subscription state error: {message}")]
    SubscriptionState { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Synchronisation error: {message}")]
    Synchronisation { message: String },
}

impl QueueError {
    pub(crate) fn subscription_state(message: impl Into<String>) -> Self {
        QueueError::SubscriptionState {
            message: message.into(),
        }
    }

    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        QueueError::IllegalState {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        QueueError::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn synchronisation(message: String) -> Self {
        QueueError::Synchronisation { message }
    }
}

impl From<BrokerError> for QueueError {
    fn from(error: BrokerError) -> Self {
        match error {
            BrokerError::UnknownConsumer { .. } => QueueError::SubscriptionState {
                message: error.to_string(),
            },
            other => QueueError::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl crate::core::error_handling::ContextualError for QueueError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, QueueError::Configuration { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            QueueError::Configuration { message } => Some(message),
            _ => None,
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
