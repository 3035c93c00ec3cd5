//! Broker channel abstraction
//!
//! The queue handler talks to a message broker only through the
//! [`BrokerChannel`] trait. A real deployment wraps an AMQP client channel;
//! [`memory::InMemoryBroker`] is a thread-backed implementation used by the
//! test-suite and for running scenarios without a broker.
//!
//! # Delivery model
//!
//! ```text
//!   send(queue, body) ──► ┌──────────────┐  dispatcher thread   ┌─────────────────┐
//!                         │    queue     │ ───────────────────► │ DeliveryHandler │
//!   reject(requeue) ────► │ ready │unack │ ◄─── ack / reject ── │ (consumer side) │
//!                         └──────────────┘                      └─────────────────┘
//! ```
//!
//! Deliveries are pushed to the handler on broker-owned threads. At most
//! `prefetch` deliveries per subscription are unacknowledged at any time.

mod error;
pub mod memory;

pub use error::{BrokerError, BrokerResult};
pub use memory::{InMemoryBroker, InMemoryChannel};

use crate::queue::MessageProperties;
use std::fmt;
use std::sync::Arc;

/// Broker-assigned identifier of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTag(String);

impl ConsumerTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a broker channel (session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

/// One unit of transport from broker to consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Tag used to ack or reject this delivery
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    /// Whether this body was delivered before and requeued
    pub redelivered: bool,
    /// How many times this body has been delivered, this one included
    pub delivery_count: u32,
}

/// Receives deliveries on broker threads
pub trait DeliveryHandler: Send + Sync {
    fn handle_delivery(&self, consumer_tag: &ConsumerTag, delivery: Delivery);

    /// Called once the subscription has been cancelled
    fn handle_cancel(&self, _consumer_tag: &ConsumerTag) {}
}

/// Session with a message broker
///
/// A channel is owned by a single queue handler; sharing one channel between
/// handlers is unsupported. Implementations must be callable from the
/// handler's delivery threads for `ack`/`reject`.
pub trait BrokerChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Start pushing deliveries from `queue` to `handler`
    ///
    /// `prefetch` bounds unacknowledged deliveries in flight; 0 means no limit.
    /// [`crate::queue::MessageConsumer`] never subscribes with 0.
    fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
        handler: Arc<dyn DeliveryHandler>,
    ) -> BrokerResult<ConsumerTag>;

    /// Stop a subscription created on this channel
    fn unsubscribe(&self, consumer_tag: &ConsumerTag) -> BrokerResult<()>;

    fn send(&self, queue: &str, body: Vec<u8>, properties: &MessageProperties) -> BrokerResult<()>;

    fn ack(&self, delivery_tag: u64) -> BrokerResult<()>;

    /// Reject a delivery, either returning it to the queue or discarding it
    fn reject(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()>;
}
