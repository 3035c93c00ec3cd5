//! Message Types
//!
//! A [`Message`] pairs a typed value with the broker metadata that travelled
//! with it. Messages built for publishing usually carry default properties;
//! messages built by the consumer carry whatever the broker delivered.

use std::collections::BTreeMap;
use std::time::SystemTime;

/// Opaque broker metadata attached to a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Application-assigned message identifier
    pub message_id: Option<String>,
    /// MIME type of the encoded body
    pub content_type: Option<String>,
    /// Time the message was created by its publisher
    pub timestamp: Option<SystemTime>,
    /// Free-form headers
    pub headers: BTreeMap<String, String>,
}

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A typed message value with its broker properties
///
/// # Example
///
/// ```rust
/// use mqverify::queue::{Message, MessageProperties};
///
/// let message = Message::new("any-content-1".to_string())
///     .with_properties(MessageProperties::new().with_message_id("1"));
/// assert_eq!(message.properties.message_id.as_deref(), Some("1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<V> {
    pub content: V,
    pub properties: MessageProperties,
}

impl<V> Message<V> {
    pub fn new(content: V) -> Self {
        Self {
            content,
            properties: MessageProperties::default(),
        }
    }

    pub fn with_properties(mut self, properties: MessageProperties) -> Self {
        self.properties = properties;
        self
    }
}

impl<V> From<V> for Message<V> {
    fn from(content: V) -> Self {
        Message::new(content)
    }
}
