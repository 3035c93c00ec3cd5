//! Message Consumer
//!
//! Subscribes to a broker queue and indexes every delivery into a
//! [`KeyedMessageStore`]. Deliveries arrive on broker-owned threads; each one
//! is decoded, keyed, stored and acknowledged before the next is handled by
//! the same subscription.
//!
//! Payloads that cannot be decoded or keyed are rejected. By default they are
//! requeued, so a permanently malformed payload keeps circulating until the
//! consumer is cancelled; [`DecodeFailurePolicy::DeadLetterAfter`] bounds that.

use crate::broker::{BrokerChannel, BrokerResult, ChannelId, ConsumerTag, Delivery, DeliveryHandler};
use crate::core::sync::handle_mutex_poison;
use crate::queue::codec::{Decoder, KeyFn};
use crate::queue::error::{DecodeError, KeyDerivationError, QueueError, QueueResult};
use crate::queue::message::{Message, MessageProperties};
use crate::queue::store::KeyedMessageStore;
use std::any::Any;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Unacknowledged deliveries allowed in flight per subscription
pub const DEFAULT_PREFETCH: u16 = 16;

/// What to do with a delivery whose payload cannot be decoded or keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeFailurePolicy {
    /// Always return it to the queue
    #[default]
    Requeue,
    /// Requeue until it has been delivered `n` times, then reject it for good
    DeadLetterAfter(u32),
}

impl DecodeFailurePolicy {
    fn should_requeue(&self, delivery_count: u32) -> bool {
        match self {
            DecodeFailurePolicy::Requeue => true,
            DecodeFailurePolicy::DeadLetterAfter(limit) => delivery_count < *limit,
        }
    }
}

/// Identifies an active subscription; required to cancel it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerHandle {
    tag: ConsumerTag,
    channel: ChannelId,
    queue: String,
}

impl ConsumerHandle {
    pub fn tag(&self) -> &ConsumerTag {
        &self.tag
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// Point-in-time delivery counters of a consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Deliveries handed to the consumer
    pub delivered: u64,
    /// Deliveries decoded, keyed and stored
    pub stored: u64,
    /// Deliveries rejected and returned to the queue
    pub rejected: u64,
    /// Deliveries rejected without requeue
    pub dead_lettered: u64,
    /// Failed ack or reject calls
    pub transport_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    delivered: AtomicU64,
    stored: AtomicU64,
    rejected: AtomicU64,
    dead_lettered: AtomicU64,
    transport_failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Delivery callback that feeds the store
struct IndexingHandler<K, V> {
    channel: Arc<dyn BrokerChannel>,
    store: Arc<KeyedMessageStore<K, V>>,
    decoder: Decoder<V>,
    key_fn: KeyFn<K, V>,
    policy: DecodeFailurePolicy,
    counters: Arc<StatsCounters>,
    queue: String,
}

impl<K, V> IndexingHandler<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Decode, key and store one body
    ///
    /// A panicking decoder or key function is reported like a failed one so
    /// the delivery is still rejected and the dispatcher keeps running.
    fn index(&self, body: &[u8], properties: MessageProperties) -> QueueResult<K> {
        let content = catch_unwind(AssertUnwindSafe(|| (self.decoder)(body))).map_err(|panic| {
            DecodeError::new(format!("decoder panicked: {}", panic_message(&*panic)))
        })??;
        let message = Message::new(content).with_properties(properties);
        let key = catch_unwind(AssertUnwindSafe(|| (self.key_fn)(&message))).map_err(|panic| {
            KeyDerivationError::new(format!("key function panicked: {}", panic_message(&*panic)))
        })??;
        self.store.put(key.clone(), message);
        Ok(key)
    }

    fn settle(&self, result: BrokerResult<()>, delivery_tag: u64, action: &str) {
        if let Err(e) = result {
            StatsCounters::bump(&self.counters.transport_failures);
            log::warn!(
                "could not {} delivery {} from queue {}: {}",
                action,
                delivery_tag,
                self.queue,
                e
            );
        }
    }
}

impl<K, V> DeliveryHandler for IndexingHandler<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Send + Sync,
{
    fn handle_delivery(&self, _consumer_tag: &ConsumerTag, delivery: Delivery) {
        StatsCounters::bump(&self.counters.delivered);
        let Delivery {
            delivery_tag,
            body,
            properties,
            delivery_count,
            ..
        } = delivery;

        match self.index(&body, properties) {
            Ok(key) => {
                StatsCounters::bump(&self.counters.stored);
                log::trace!("received message with key {:?} from {}", key, self.queue);
                self.settle(self.channel.ack(delivery_tag), delivery_tag, "ack");
            }
            Err(e) => {
                let requeue = self.policy.should_requeue(delivery_count);
                if requeue {
                    StatsCounters::bump(&self.counters.rejected);
                    log::warn!(
                        "skipping message from {} (delivery {}), requeueing: {}",
                        self.queue,
                        delivery_count,
                        e
                    );
                } else {
                    StatsCounters::bump(&self.counters.dead_lettered);
                    log::warn!(
                        "discarding message from {} after {} deliveries: {}",
                        self.queue,
                        delivery_count,
                        e
                    );
                }
                self.settle(
                    self.channel.reject(delivery_tag, requeue),
                    delivery_tag,
                    "reject",
                );
            }
        }
    }

    fn handle_cancel(&self, consumer_tag: &ConsumerTag) {
        log::debug!("consumer {} on {} cancelled", consumer_tag, self.queue);
    }
}

/// Indexes deliveries from one queue into a shared store
///
/// At most one subscription is active at a time. The consumer borrows the
/// channel; it never closes it.
///
/// # Example
///
/// ```rust
/// use mqverify::broker::InMemoryBroker;
/// use mqverify::queue::codec::{by_content, utf8_decoder};
/// use mqverify::queue::{DecodeFailurePolicy, KeyedMessageStore, MessageConsumer};
/// use std::sync::Arc;
///
/// let broker = InMemoryBroker::new();
/// let queue = broker.declare_anonymous_queue().unwrap();
/// let channel = Arc::new(broker.create_channel().unwrap());
/// let store = Arc::new(KeyedMessageStore::<String, String>::new());
///
/// let consumer = MessageConsumer::new(channel, store, 16);
/// let handle = consumer
///     .start(&queue, utf8_decoder(), by_content(|s: &String| s.clone()), DecodeFailurePolicy::Requeue)
///     .unwrap();
/// consumer.cancel(&handle).unwrap();
/// ```
pub struct MessageConsumer<K, V> {
    channel: Arc<dyn BrokerChannel>,
    store: Arc<KeyedMessageStore<K, V>>,
    prefetch: u16,
    active: Mutex<Option<ConsumerHandle>>,
    counters: Arc<StatsCounters>,
}

impl<K, V> Debug for MessageConsumer<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageConsumer")
            .field("channel", &self.channel.id())
            .field("prefetch", &self.prefetch)
            .field("active", &self.active)
            .finish()
    }
}

impl<K, V> MessageConsumer<K, V> {
    /// Create a consumer that indexes into `store`
    ///
    /// # Arguments
    /// * `channel` - Channel to subscribe on; the consumer never closes it
    /// * `store` - Store shared with readers
    /// * `prefetch` - Unacknowledged deliveries allowed in flight. The broker
    ///   reads 0 as "no limit", so 0 is replaced with [`DEFAULT_PREFETCH`]
    pub fn new(
        channel: Arc<dyn BrokerChannel>,
        store: Arc<KeyedMessageStore<K, V>>,
        prefetch: u16,
    ) -> Self {
        let prefetch = if prefetch == 0 {
            log::warn!("prefetch 0 would disable backpressure, using {}", DEFAULT_PREFETCH);
            DEFAULT_PREFETCH
        } else {
            prefetch
        };
        Self {
            channel,
            store,
            prefetch,
            active: Mutex::new(None),
            counters: Arc::new(StatsCounters::default()),
        }
    }

    /// Cancel the subscription identified by `handle`
    ///
    /// Fails with [`QueueError::SubscriptionState`] when nothing is active,
    /// when `handle` belongs to another channel, or when it names a
    /// subscription other than the active one.
    pub fn cancel(&self, handle: &ConsumerHandle) -> QueueResult<()> {
        let mut active = handle_mutex_poison(self.active.lock(), QueueError::synchronisation)?;
        match active.as_ref() {
            None => {
                return Err(QueueError::subscription_state("consumer not started"));
            }
            Some(_) if handle.channel != self.channel.id() => {
                return Err(QueueError::subscription_state(format!(
                    "consumer {} belongs to {}, not {}",
                    handle.tag,
                    handle.channel,
                    self.channel.id()
                )));
            }
            Some(current) if current != handle => {
                return Err(QueueError::subscription_state(format!(
                    "consumer {} is not the active subscription {}",
                    handle.tag, current.tag
                )));
            }
            Some(_) => {}
        }

        log::debug!("cancelling consumer {} on {}", handle.tag, handle.queue);
        self.channel.unsubscribe(&handle.tag)?;
        *active = None;
        Ok(())
    }

    /// Cancel the active subscription, if any
    ///
    /// Safe to call any number of times.
    pub fn close(&self) -> QueueResult<()> {
        let mut active = handle_mutex_poison(self.active.lock(), QueueError::synchronisation)?;
        if let Some(handle) = active.as_ref() {
            log::debug!("closing consumer {} on {}", handle.tag, handle.queue);
            self.channel.unsubscribe(&handle.tag)?;
            *active = None;
        }
        Ok(())
    }

    pub fn active_handle(&self) -> QueueResult<Option<ConsumerHandle>> {
        let active = handle_mutex_poison(self.active.lock(), QueueError::synchronisation)?;
        Ok(active.clone())
    }

    pub fn is_consuming(&self) -> bool {
        self.active
            .lock()
            .map(|active| active.is_some())
            .unwrap_or(false)
    }

    pub fn store(&self) -> &Arc<KeyedMessageStore<K, V>> {
        &self.store
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }
}

impl<K, V> MessageConsumer<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Subscribe to `queue` and start indexing deliveries
    ///
    /// Returns as soon as the subscription exists; deliveries are processed
    /// in the background.
    pub fn start(
        &self,
        queue: &str,
        decoder: Decoder<V>,
        key_fn: KeyFn<K, V>,
        policy: DecodeFailurePolicy,
    ) -> QueueResult<ConsumerHandle> {
        let mut active = handle_mutex_poison(self.active.lock(), QueueError::synchronisation)?;
        if let Some(current) = active.as_ref() {
            return Err(QueueError::subscription_state(format!(
                "consumer {} already started on {}",
                current.tag, current.queue
            )));
        }

        log::debug!(
            "setting up consumer on {} with prefetch {}",
            queue,
            self.prefetch
        );
        let handler = IndexingHandler {
            channel: Arc::clone(&self.channel),
            store: Arc::clone(&self.store),
            decoder,
            key_fn,
            policy,
            counters: Arc::clone(&self.counters),
            queue: queue.to_string(),
        };
        let tag = self
            .channel
            .subscribe(queue, self.prefetch, Arc::new(handler))?;

        let handle = ConsumerHandle {
            tag,
            channel: self.channel.id(),
            queue: queue.to_string(),
        };
        log::debug!("consumer {} started on {}", handle.tag, queue);
        *active = Some(handle.clone());
        Ok(handle)
    }
}
