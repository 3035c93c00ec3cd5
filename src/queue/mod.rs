//! Queue indexing component
//!
//! Consumes a broker queue into a keyed store and publishes to it, so that
//! tests can publish messages and then assert, eventually, on what arrived.
//!
//! # Overview
//!
//! - **Consumer**: decodes each delivery, derives its key and keeps the latest
//!   message per key in a [`KeyedMessageStore`]
//! - **Publisher**: encodes values and sends them with bounded parallelism
//! - **Handler**: [`QueueHandler`] owns both for one queue and adds
//!   `eventually_*` reads driven by a [`RetryPolicy`](crate::core::retry::RetryPolicy)
//!
//! # Architecture
//!
//! ```text
//!  test thread                         broker threads
//!  ───────────                         ──────────────
//!  QueueHandler::publish ──► MessagePublisher ──send──► queue
//!                                                        │ deliver
//!                                                        ▼
//!  eventually(store.get) ◄── KeyedMessageStore ◄──put── IndexingHandler
//!                                                        │ ack / reject
//!                                                        ▼
//!                                                      broker
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use mqverify::broker::InMemoryBroker;
//! use mqverify::core::matchers::has_len;
//! use mqverify::queue::codec::{json_decoder, json_encoder};
//! use mqverify::queue::QueueHandler;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Order {
//!     id: String,
//! }
//!
//! let broker = InMemoryBroker::new();
//! let queue = broker.declare_anonymous_queue().unwrap();
//! let handler = QueueHandler::builder()
//!     .channel(Arc::new(broker.create_channel().unwrap()))
//!     .queue(queue)
//!     .indexing_by_content(|order: &Order| order.id.clone())
//!     .consuming_by(json_decoder())
//!     .publishing_by(json_encoder())
//!     .build()
//!     .unwrap();
//!
//! handler.consume().unwrap();
//! let orders = (0..3).map(|i| Order { id: i.to_string() });
//! handler.publish_values(orders).unwrap();
//! handler.eventually_received(&has_len(3)).unwrap();
//! ```

pub mod api;
pub mod codec;
mod consumer;
mod error;
mod handler;
mod message;
mod publisher;
mod shared;
mod store;

pub use consumer::{
    ConsumerHandle, ConsumerStats, DecodeFailurePolicy, MessageConsumer, DEFAULT_PREFETCH,
};
pub use error::{DecodeError, EncodeError, KeyDerivationError, QueueError, QueueResult};
pub use handler::{HandlerState, QueueHandler, QueueHandlerBuilder};
pub use message::{Message, MessageProperties};
pub use publisher::{MessagePublisher, DEFAULT_PUBLISH_PARALLELISM};
pub use shared::SharedQueueHandler;
pub use store::KeyedMessageStore;

#[cfg(test)]
mod tests;
