//! Broker Error Types

use crate::broker::{ChannelId, ConsumerTag};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker transport failure: {message}")]
    Transport { message: String },

    #[error("No queue '{queue}'")]
    UnknownQueue { queue: String },

    #[error("Unknown delivery tag {delivery_tag}")]
    UnknownDeliveryTag { delivery_tag: u64 },

    #[error("No active consumer '{tag}' on this channel")]
    UnknownConsumer { tag: ConsumerTag },

    #[error("Channel {channel} is closed")]
    ChannelClosed { channel: ChannelId },
}

impl BrokerError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        BrokerError::Transport {
            message: message.into(),
        }
    }
}

/// Result type for broker channel operations
pub type BrokerResult<T> = Result<T, BrokerError>;
