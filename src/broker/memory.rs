//! In-memory broker
//!
//! A small AMQP-like broker living inside the process. Queues hold ready
//! bodies; each subscription gets a dispatcher thread that moves bodies to
//! the unacknowledged set (bounded by prefetch) and pushes them to the
//! subscriber's [`DeliveryHandler`]. Rejected bodies are requeued to the back
//! of their queue or parked as dead letters.

use crate::broker::{
    BrokerChannel, BrokerError, BrokerResult, ChannelId, ConsumerTag, Delivery, DeliveryHandler,
};
use crate::core::sync::handle_mutex_poison;
use crate::queue::MessageProperties;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone)]
struct Envelope {
    body: Vec<u8>,
    properties: MessageProperties,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    dead_letters: Vec<Envelope>,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    channel: ChannelId,
    consumer: ConsumerTag,
    envelope: Envelope,
}

#[derive(Debug)]
struct Subscription {
    queue: String,
    channel: ChannelId,
    prefetch: u16,
    in_flight: usize,
    dispatcher: Option<JoinHandle<()>>,
}

impl Subscription {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < usize::from(self.prefetch)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, Unacked>,
    subscriptions: HashMap<ConsumerTag, Subscription>,
    next_delivery_tag: u64,
}

impl BrokerState {
    /// Remove an unacked delivery owned by `channel`
    fn take_unacked(&mut self, delivery_tag: u64, channel: ChannelId) -> BrokerResult<Unacked> {
        match self.unacked.get(&delivery_tag) {
            Some(entry) if entry.channel == channel => {}
            _ => return Err(BrokerError::UnknownDeliveryTag { delivery_tag }),
        }
        let entry = self
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag { delivery_tag })?;
        if let Some(subscription) = self.subscriptions.get_mut(&entry.consumer) {
            subscription.in_flight = subscription.in_flight.saturating_sub(1);
        }
        Ok(entry)
    }
}

#[derive(Debug)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    changed: Condvar,
    connected: AtomicBool,
    next_channel: AtomicU64,
    next_consumer: AtomicU64,
    next_anonymous: AtomicU64,
}

impl BrokerInner {
    fn lock(&self) -> BrokerResult<MutexGuard<'_, BrokerState>> {
        handle_mutex_poison(self.state.lock(), BrokerError::transport)
    }

    fn ensure_connected(&self) -> BrokerResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::transport("connection to broker lost"))
        }
    }

    /// Block until a delivery is available for `consumer_tag`.
    ///
    /// Returns `None` once the subscription is gone.
    fn next_delivery(&self, consumer_tag: &ConsumerTag) -> Option<Delivery> {
        let mut state = self.state.lock().ok()?;
        loop {
            let connected = self.connected.load(Ordering::Acquire);
            let BrokerState {
                queues,
                unacked,
                subscriptions,
                next_delivery_tag,
            } = &mut *state;
            let subscription = subscriptions.get_mut(consumer_tag)?;

            if connected && subscription.has_capacity() {
                let ready = queues
                    .get_mut(&subscription.queue)
                    .and_then(|queue| queue.ready.pop_front());
                if let Some(mut envelope) = ready {
                    envelope.delivery_count += 1;
                    *next_delivery_tag += 1;
                    subscription.in_flight += 1;
                    let delivery = Delivery {
                        delivery_tag: *next_delivery_tag,
                        body: envelope.body.clone(),
                        properties: envelope.properties.clone(),
                        redelivered: envelope.delivery_count > 1,
                        delivery_count: envelope.delivery_count,
                    };
                    unacked.insert(
                        delivery.delivery_tag,
                        Unacked {
                            queue: subscription.queue.clone(),
                            channel: subscription.channel,
                            consumer: consumer_tag.clone(),
                            envelope,
                        },
                    );
                    return Some(delivery);
                }
            }

            state = self.changed.wait(state).ok()?;
        }
    }
}

fn join_dispatcher(mut subscription: Subscription) {
    if let Some(handle) = subscription.dispatcher.take() {
        // a handler may cancel its own subscription from the dispatcher thread
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

/// Connection to an in-process broker
///
/// Cloning yields another handle to the same broker.
///
/// # Example
///
/// ```rust
/// use mqverify::broker::{BrokerChannel, InMemoryBroker};
/// use mqverify::queue::MessageProperties;
///
/// let broker = InMemoryBroker::new();
/// let queue = broker.declare_anonymous_queue().unwrap();
/// let channel = broker.create_channel().unwrap();
/// channel.send(&queue, b"hello".to_vec(), &MessageProperties::new()).unwrap();
/// assert_eq!(broker.queue_depth(&queue), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                changed: Condvar::new(),
                connected: AtomicBool::new(true),
                next_channel: AtomicU64::new(1),
                next_consumer: AtomicU64::new(1),
                next_anonymous: AtomicU64::new(1),
            }),
        }
    }

    /// Declare a named queue; declaring an existing queue is a no-op
    pub fn declare_queue(&self, name: &str) -> BrokerResult<()> {
        self.inner.ensure_connected()?;
        let mut state = self.inner.lock()?;
        state.queues.entry(name.to_string()).or_default();
        Ok(())
    }

    /// Declare a queue with a broker-generated name
    pub fn declare_anonymous_queue(&self) -> BrokerResult<String> {
        let id = self.inner.next_anonymous.fetch_add(1, Ordering::Relaxed);
        let name = format!("amq.gen-{id}");
        self.declare_queue(&name)?;
        Ok(name)
    }

    pub fn create_channel(&self) -> BrokerResult<InMemoryChannel> {
        self.inner.ensure_connected()?;
        let id = ChannelId::new(self.inner.next_channel.fetch_add(1, Ordering::Relaxed));
        log::debug!("opened channel {}", id);
        Ok(InMemoryChannel {
            id,
            broker: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        })
    }

    /// Simulate losing or regaining the connection
    ///
    /// While disconnected every channel operation fails with a transport
    /// error and no deliveries are dispatched.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::Release);
        self.inner.changed.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Number of bodies waiting to be delivered
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .map(|state| state.queues.get(queue).map_or(0, |q| q.ready.len()))
            .unwrap_or(0)
    }

    /// Number of delivered but not yet acknowledged bodies
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .map(|state| state.unacked.values().filter(|u| u.queue == queue).count())
            .unwrap_or(0)
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .map(|state| {
                state
                    .subscriptions
                    .values()
                    .filter(|s| s.queue == queue)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Bodies rejected without requeue
    pub fn dead_letters(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .map(|state| {
                state.queues.get(queue).map_or_else(Vec::new, |q| {
                    q.dead_letters.iter().map(|e| e.body.clone()).collect()
                })
            })
            .unwrap_or_default()
    }
}

/// Channel on an [`InMemoryBroker`]
pub struct InMemoryChannel {
    id: ChannelId,
    broker: Arc<BrokerInner>,
    closed: AtomicBool,
}

impl fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl InMemoryChannel {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_usable(&self) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::ChannelClosed { channel: self.id });
        }
        self.broker.ensure_connected()
    }

    /// Close the channel
    ///
    /// Cancels its subscriptions and returns its unacknowledged deliveries to
    /// the front of their queues. Closing twice is a no-op.
    pub fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let cancelled: Vec<Subscription> = {
            let mut state = self.broker.lock()?;
            let tags: Vec<ConsumerTag> = state
                .subscriptions
                .iter()
                .filter(|(_, s)| s.channel == self.id)
                .map(|(tag, _)| tag.clone())
                .collect();
            let cancelled = tags
                .iter()
                .filter_map(|tag| state.subscriptions.remove(tag))
                .collect();

            let mut orphaned: Vec<u64> = state
                .unacked
                .iter()
                .filter(|(_, u)| u.channel == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            orphaned.sort_unstable();
            for delivery_tag in orphaned.into_iter().rev() {
                if let Some(entry) = state.unacked.remove(&delivery_tag) {
                    state
                        .queues
                        .entry(entry.queue)
                        .or_default()
                        .ready
                        .push_front(entry.envelope);
                }
            }
            cancelled
        };

        self.broker.changed.notify_all();
        for subscription in cancelled {
            join_dispatcher(subscription);
        }
        log::debug!("closed channel {}", self.id);
        Ok(())
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("while closing channel {} got {}", self.id, e);
        }
    }
}

impl BrokerChannel for InMemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
        handler: Arc<dyn DeliveryHandler>,
    ) -> BrokerResult<ConsumerTag> {
        self.ensure_usable()?;
        let consumer_tag = ConsumerTag::new(format!(
            "amq.ctag-{}",
            self.broker.next_consumer.fetch_add(1, Ordering::Relaxed)
        ));

        {
            let mut state = self.broker.lock()?;
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::UnknownQueue {
                    queue: queue.to_string(),
                });
            }
            state.subscriptions.insert(
                consumer_tag.clone(),
                Subscription {
                    queue: queue.to_string(),
                    channel: self.id,
                    prefetch,
                    in_flight: 0,
                    dispatcher: None,
                },
            );
        }

        let broker = Arc::clone(&self.broker);
        let tag = consumer_tag.clone();
        let spawned = thread::Builder::new()
            .name(format!("dispatch-{}", consumer_tag))
            .spawn(move || {
                while let Some(delivery) = broker.next_delivery(&tag) {
                    handler.handle_delivery(&tag, delivery);
                }
                handler.handle_cancel(&tag);
            });

        let mut state = self.broker.lock()?;
        match spawned {
            Ok(dispatcher) => {
                if let Some(subscription) = state.subscriptions.get_mut(&consumer_tag) {
                    subscription.dispatcher = Some(dispatcher);
                }
                Ok(consumer_tag)
            }
            Err(e) => {
                state.subscriptions.remove(&consumer_tag);
                Err(BrokerError::transport(format!(
                    "cannot start dispatcher thread: {e}"
                )))
            }
        }
    }

    fn unsubscribe(&self, consumer_tag: &ConsumerTag) -> BrokerResult<()> {
        self.ensure_usable()?;
        let subscription = {
            let mut state = self.broker.lock()?;
            match state.subscriptions.get(consumer_tag) {
                Some(s) if s.channel == self.id => {}
                _ => {
                    return Err(BrokerError::UnknownConsumer {
                        tag: consumer_tag.clone(),
                    })
                }
            }
            state.subscriptions.remove(consumer_tag)
        };

        self.broker.changed.notify_all();
        if let Some(subscription) = subscription {
            join_dispatcher(subscription);
        }
        Ok(())
    }

    fn send(&self, queue: &str, body: Vec<u8>, properties: &MessageProperties) -> BrokerResult<()> {
        self.ensure_usable()?;
        {
            let mut state = self.broker.lock()?;
            let target = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::UnknownQueue {
                    queue: queue.to_string(),
                })?;
            target.ready.push_back(Envelope {
                body,
                properties: properties.clone(),
                delivery_count: 0,
            });
        }
        self.broker.changed.notify_all();
        Ok(())
    }

    fn ack(&self, delivery_tag: u64) -> BrokerResult<()> {
        self.ensure_usable()?;
        {
            let mut state = self.broker.lock()?;
            state.take_unacked(delivery_tag, self.id)?;
        }
        self.broker.changed.notify_all();
        Ok(())
    }

    fn reject(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        self.ensure_usable()?;
        {
            let mut state = self.broker.lock()?;
            let entry = state.take_unacked(delivery_tag, self.id)?;
            let queue = state.queues.entry(entry.queue).or_default();
            if requeue {
                queue.ready.push_back(entry.envelope);
            } else {
                queue.dead_letters.push(entry.envelope);
            }
        }
        self.broker.changed.notify_all();
        Ok(())
    }
}
