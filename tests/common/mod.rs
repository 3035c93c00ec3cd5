//! Common test utilities and helpers
//!
//! Fixtures shared by the integration scenarios: a JSON message model and a
//! handler wired to an in-memory broker.

#![allow(dead_code)]

use mqverify::broker::{InMemoryBroker, InMemoryChannel};
use mqverify::core::retry::RetryPolicy;
use mqverify::queue::codec::{json_decoder, json_encoder};
use mqverify::queue::{QueueHandler, QueueHandlerBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// JSON message model used across scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnObject {
    pub id: String,
}

impl AnObject {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Polling policy for scenarios: up to 10 seconds, 20 ms apart
pub fn scenario_policy() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_secs(10), Duration::from_millis(20))
}

pub struct Fixture {
    pub broker: InMemoryBroker,
    pub queue: String,
    pub channel: Arc<InMemoryChannel>,
}

impl Fixture {
    pub fn new() -> Self {
        let broker = InMemoryBroker::new();
        let queue = broker.declare_anonymous_queue().unwrap();
        let channel = Arc::new(broker.create_channel().unwrap());
        Self {
            broker,
            queue,
            channel,
        }
    }

    /// Handler keyed by `AnObject::id`, JSON both ways
    pub fn object_handler(&self) -> QueueHandlerBuilder<String, AnObject> {
        QueueHandler::builder()
            .channel(self.channel.clone())
            .queue(self.queue.as_str())
            .indexing_by_content(|object: &AnObject| object.id.clone())
            .consuming_by(json_decoder())
            .publishing_by(json_encoder())
            .retry_policy(scenario_policy())
    }
}
