//! Test modules for the queue system
//!
//! Tests are organised by functional area. Shared fixtures live here.

mod edge_cases;
mod lifecycle;

use crate::broker::{
    BrokerChannel, BrokerError, BrokerResult, ChannelId, ConsumerTag, DeliveryHandler,
    InMemoryBroker, InMemoryChannel,
};
use crate::core::eventually::eventually_that;
use crate::core::retry::RetryPolicy;
use crate::queue::codec::{try_by_content, KeyFn};
use crate::queue::error::KeyDerivationError;
use crate::queue::message::MessageProperties;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn fast_policy() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_secs(5), Duration::from_millis(10))
}

/// Block until `condition` holds, failing the test after a few seconds
pub(crate) fn wait_until(description: &str, condition: impl Fn() -> bool) {
    eventually_that(condition, description, |ok: &bool| *ok, &fast_policy()).unwrap();
}

/// Key a text payload by parsing it as an integer
pub(crate) fn int_key() -> KeyFn<i32, String> {
    try_by_content(|text: &String| {
        text.parse::<i32>()
            .map_err(|e| KeyDerivationError::new(format!("'{}': {}", text, e)))
    })
}

pub(crate) fn broker_with_queue() -> (InMemoryBroker, String, Arc<InMemoryChannel>) {
    let broker = InMemoryBroker::new();
    let queue = broker.declare_anonymous_queue().unwrap();
    let channel = Arc::new(broker.create_channel().unwrap());
    (broker, queue, channel)
}

/// Channel that records sends and fails acks on request
pub(crate) struct RecordingChannel {
    inner: InMemoryChannel,
    pub(crate) sent: Mutex<Vec<(String, Vec<u8>, MessageProperties)>>,
    pub(crate) fail_acks: AtomicBool,
}

impl RecordingChannel {
    pub(crate) fn new(broker: &InMemoryBroker) -> Self {
        Self {
            inner: broker.create_channel().unwrap(),
            sent: Mutex::new(Vec::new()),
            fail_acks: AtomicBool::new(false),
        }
    }

    pub(crate) fn sent_bodies(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body, _)| String::from_utf8_lossy(body).into_owned())
            .collect()
    }
}

impl BrokerChannel for RecordingChannel {
    fn id(&self) -> ChannelId {
        self.inner.id()
    }

    fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
        handler: Arc<dyn DeliveryHandler>,
    ) -> BrokerResult<ConsumerTag> {
        self.inner.subscribe(queue, prefetch, handler)
    }

    fn unsubscribe(&self, consumer_tag: &ConsumerTag) -> BrokerResult<()> {
        self.inner.unsubscribe(consumer_tag)
    }

    fn send(&self, queue: &str, body: Vec<u8>, properties: &MessageProperties) -> BrokerResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((queue.to_string(), body.clone(), properties.clone()));
        self.inner.send(queue, body, properties)
    }

    fn ack(&self, delivery_tag: u64) -> BrokerResult<()> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport {
                message: "ack refused".to_string(),
            });
        }
        self.inner.ack(delivery_tag)
    }

    fn reject(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        self.inner.reject(delivery_tag, requeue)
    }
}
