//! Payload codecs and key functions
//!
//! The consumer and publisher never interpret payloads themselves; they are
//! handed a decoder, an encoder and a key function. This module defines those
//! seams and a few stock implementations.

use crate::queue::error::{DecodeError, EncodeError, KeyDerivationError};
use crate::queue::message::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Converts a raw delivery body into a typed value
pub type Decoder<V> = Arc<dyn Fn(&[u8]) -> Result<V, DecodeError> + Send + Sync>;

/// Converts a typed value into a publishable body
pub type Encoder<V> = Arc<dyn Fn(&V) -> Result<Vec<u8>, EncodeError> + Send + Sync>;

/// Derives the store key of a decoded message
pub type KeyFn<K, V> = Arc<dyn Fn(&Message<V>) -> Result<K, KeyDerivationError> + Send + Sync>;

const PREVIEW_LIMIT: usize = 100;

fn preview(body: &[u8]) -> String {
    if body.len() > PREVIEW_LIMIT {
        format!("{}...", String::from_utf8_lossy(&body[..PREVIEW_LIMIT]))
    } else {
        String::from_utf8_lossy(body).into_owned()
    }
}

/// JSON decoder for any deserializable type
pub fn json_decoder<V>() -> Decoder<V>
where
    V: DeserializeOwned + 'static,
{
    Arc::new(|body: &[u8]| {
        serde_json::from_slice(body).map_err(|e| {
            DecodeError::new(format!(
                "not a {}: {} | data_length: {}, data_preview: '{}'",
                std::any::type_name::<V>(),
                e,
                body.len(),
                preview(body)
            ))
        })
    })
}

/// JSON encoder for any serializable type
pub fn json_encoder<V>() -> Encoder<V>
where
    V: Serialize + 'static,
{
    Arc::new(|value: &V| serde_json::to_vec(value).map_err(|e| EncodeError::new(e.to_string())))
}

/// UTF-8 text decoder
pub fn utf8_decoder() -> Decoder<String> {
    Arc::new(|body: &[u8]| {
        String::from_utf8(body.to_vec()).map_err(|e| {
            DecodeError::new(format!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to()))
        })
    })
}

/// UTF-8 text encoder
pub fn utf8_encoder() -> Encoder<String> {
    Arc::new(|value: &String| Ok(value.as_bytes().to_vec()))
}

/// Pass-through decoder for raw bodies
pub fn bytes_decoder() -> Decoder<Vec<u8>> {
    Arc::new(|body: &[u8]| Ok(body.to_vec()))
}

/// Pass-through encoder for raw bodies
pub fn bytes_encoder() -> Encoder<Vec<u8>> {
    Arc::new(|value: &Vec<u8>| Ok(value.clone()))
}

/// Key function over the message content only
pub fn by_content<K, V, F>(key_of: F) -> KeyFn<K, V>
where
    K: 'static,
    V: 'static,
    F: Fn(&V) -> K + Send + Sync + 'static,
{
    Arc::new(move |message: &Message<V>| Ok(key_of(&message.content)))
}

/// Fallible key function over the message content
pub fn try_by_content<K, V, F>(key_of: F) -> KeyFn<K, V>
where
    K: 'static,
    V: 'static,
    F: Fn(&V) -> Result<K, KeyDerivationError> + Send + Sync + 'static,
{
    Arc::new(move |message: &Message<V>| key_of(&message.content))
}

/// Key by the broker `message_id` property
pub fn by_message_id<V: 'static>() -> KeyFn<String, V> {
    Arc::new(|message: &Message<V>| {
        message
            .properties
            .message_id
            .clone()
            .ok_or_else(|| KeyDerivationError::new("message has no message_id property"))
    })
}
