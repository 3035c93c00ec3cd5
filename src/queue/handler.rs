//! Queue Handler
//!
//! Ties a [`MessageConsumer`], a [`MessagePublisher`] and their shared
//! [`KeyedMessageStore`] to one queue on one channel, and exposes the polling
//! reads that tests assert against.
//!
//! # Lifecycle
//!
//! ```text
//!   Created ──consume──► Consuming ──cancel──► Created
//!      │                     │
//!      └───────close─────────┴──────────────► Closed
//! ```
//!
//! Publishing is allowed before and while consuming. Reads stay available
//! after close so a test can still inspect what was received.

use crate::broker::BrokerChannel;
use crate::core::config::Settings;
use crate::core::eventually::{eventually, TimeoutAssertionError};
use crate::core::matchers::Matcher;
use crate::core::retry::RetryPolicy;
use crate::core::sync::handle_mutex_poison;
use crate::queue::codec::{by_content, Decoder, Encoder, KeyFn};
use crate::queue::consumer::{
    ConsumerHandle, ConsumerStats, DecodeFailurePolicy, MessageConsumer, DEFAULT_PREFETCH,
};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::message::Message;
use crate::queue::publisher::{MessagePublisher, DEFAULT_PUBLISH_PARALLELISM};
use crate::queue::store::KeyedMessageStore;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use strum_macros::{Display, EnumIter};

/// Lifecycle state of a [`QueueHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum HandlerState {
    Created,
    Consuming,
    Closed,
}

/// Assembles a [`QueueHandler`]
///
/// `channel`, `queue`, a key function, a decoder and an encoder are required.
pub struct QueueHandlerBuilder<K, V> {
    channel: Option<Arc<dyn BrokerChannel>>,
    queue: Option<String>,
    key_fn: Option<KeyFn<K, V>>,
    decoder: Option<Decoder<V>>,
    encoder: Option<Encoder<V>>,
    prefetch: u16,
    publish_parallelism: usize,
    decode_failure_policy: DecodeFailurePolicy,
    retry_policy: RetryPolicy,
}

impl<K, V> Default for QueueHandlerBuilder<K, V> {
    fn default() -> Self {
        Self {
            channel: None,
            queue: None,
            key_fn: None,
            decoder: None,
            encoder: None,
            prefetch: DEFAULT_PREFETCH,
            publish_parallelism: DEFAULT_PUBLISH_PARALLELISM,
            decode_failure_policy: DecodeFailurePolicy::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl<K, V> QueueHandlerBuilder<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Broker channel used for both consuming and publishing
    ///
    /// The handler borrows the channel for its lifetime and never closes it.
    pub fn channel(mut self, channel: Arc<dyn BrokerChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Name of the queue to consume from and publish to
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Key messages by content and properties
    ///
    /// # Arguments
    /// * `key_fn` - Derives the store key from a decoded message. An `Err`
    ///   (or a panic) rejects the delivery like a decode failure.
    ///
    /// # Example
    /// ```rust
    /// use mqverify::queue::codec::by_message_id;
    /// use mqverify::queue::QueueHandler;
    ///
    /// let builder = QueueHandler::<String, String>::builder().indexing_by(by_message_id());
    /// ```
    pub fn indexing_by(mut self, key_fn: KeyFn<K, V>) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    /// Key messages by content only
    pub fn indexing_by_content<F>(self, key_of: F) -> Self
    where
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        self.indexing_by(by_content(key_of))
    }

    /// Decoder turning delivery bodies into `V`
    pub fn consuming_by(mut self, decoder: Decoder<V>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Encoder turning `V` into message bodies; an encode failure fails the publish
    pub fn publishing_by(mut self, encoder: Encoder<V>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Unacknowledged deliveries in flight, default [`DEFAULT_PREFETCH`]; must be > 0
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Concurrent sends per publish call, default [`DEFAULT_PUBLISH_PARALLELISM`]
    pub fn publish_parallelism(mut self, parallelism: usize) -> Self {
        self.publish_parallelism = parallelism;
        self
    }

    /// What to do with payloads that cannot be decoded or keyed
    pub fn decode_failure_policy(mut self, policy: DecodeFailurePolicy) -> Self {
        self.decode_failure_policy = policy;
        self
    }

    /// Policy used by the `eventually_*` reads
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Apply queue and retry settings from configuration
    ///
    /// The queue name is only taken from `settings` when it is set there.
    pub fn settings(mut self, settings: &Settings) -> Self {
        if let Some(name) = &settings.queue.name {
            self.queue = Some(name.clone());
        }
        self.prefetch = settings.queue.prefetch;
        self.publish_parallelism = settings.queue.publish_parallelism;
        self.decode_failure_policy = settings.queue.decode_failure_policy();
        self.retry_policy = settings.retry.to_policy();
        self
    }

    /// Assemble the handler in the `Created` state
    ///
    /// # Returns
    /// The handler, or [`QueueError::Configuration`] naming the first missing
    /// part or zero limit.
    pub fn build(self) -> QueueResult<QueueHandler<K, V>> {
        let channel = self
            .channel
            .ok_or_else(|| QueueError::configuration("no broker channel given"))?;
        let queue = self
            .queue
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| QueueError::configuration("no queue name given"))?;
        let key_fn = self
            .key_fn
            .ok_or_else(|| QueueError::configuration("no key function given (indexing_by)"))?;
        let decoder = self
            .decoder
            .ok_or_else(|| QueueError::configuration("no decoder given (consuming_by)"))?;
        let encoder = self
            .encoder
            .ok_or_else(|| QueueError::configuration("no encoder given (publishing_by)"))?;
        if self.prefetch == 0 {
            return Err(QueueError::configuration("prefetch must be greater than 0"));
        }
        if self.publish_parallelism == 0 {
            return Err(QueueError::configuration(
                "publish parallelism must be greater than 0",
            ));
        }

        let store = Arc::new(KeyedMessageStore::new());
        let consumer = MessageConsumer::new(Arc::clone(&channel), Arc::clone(&store), self.prefetch);
        let publisher =
            MessagePublisher::new(channel, encoder).with_parallelism(self.publish_parallelism);

        log::debug!("created queue handler for {}", queue);
        Ok(QueueHandler {
            queue,
            store,
            consumer,
            publisher,
            decoder,
            key_fn,
            decode_failure_policy: self.decode_failure_policy,
            retry_policy: self.retry_policy,
            state: Mutex::new(HandlerState::Created),
        })
    }
}

/// Publishes to and indexes one queue
///
/// # Example
///
/// ```rust
/// use mqverify::broker::InMemoryBroker;
/// use mqverify::core::matchers::present;
/// use mqverify::queue::codec::{utf8_decoder, utf8_encoder};
/// use mqverify::queue::QueueHandler;
/// use std::sync::Arc;
///
/// let broker = InMemoryBroker::new();
/// let queue = broker.declare_anonymous_queue().unwrap();
///
/// let handler = QueueHandler::builder()
///     .channel(Arc::new(broker.create_channel().unwrap()))
///     .queue(queue)
///     .indexing_by_content(|s: &String| s.clone())
///     .consuming_by(utf8_decoder())
///     .publishing_by(utf8_encoder())
///     .build()
///     .unwrap();
///
/// handler.consume().unwrap();
/// handler.publish_values(vec!["k1".to_string()]).unwrap();
/// let found = handler.eventually_message(&"k1".to_string(), &present()).unwrap();
/// assert!(found.is_some());
/// handler.close().unwrap();
/// ```
pub struct QueueHandler<K, V> {
    queue: String,
    store: Arc<KeyedMessageStore<K, V>>,
    consumer: MessageConsumer<K, V>,
    publisher: MessagePublisher<V>,
    decoder: Decoder<V>,
    key_fn: KeyFn<K, V>,
    decode_failure_policy: DecodeFailurePolicy,
    retry_policy: RetryPolicy,
    state: Mutex<HandlerState>,
}

impl<K, V> Debug for QueueHandler<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandler")
            .field("queue", &self.queue)
            .field("state", &self.state)
            .field("consumer", &self.consumer)
            .field("publisher", &self.publisher)
            .finish()
    }
}

impl<K, V> QueueHandler<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn builder() -> QueueHandlerBuilder<K, V> {
        QueueHandlerBuilder::default()
    }

    fn lock_state(&self) -> QueueResult<MutexGuard<'_, HandlerState>> {
        handle_mutex_poison(self.state.lock(), QueueError::synchronisation)
    }

    fn ensure_open(&self, state: HandlerState, operation: &str) -> QueueResult<()> {
        if state == HandlerState::Closed {
            return Err(QueueError::illegal_state(format!(
                "cannot {} on {}: handler is closed",
                operation, self.queue
            )));
        }
        Ok(())
    }

    /// Start indexing deliveries from the queue
    pub fn consume(&self) -> QueueResult<ConsumerHandle> {
        let mut state = self.lock_state()?;
        self.ensure_open(*state, "consume")?;
        let handle = self.consumer.start(
            &self.queue,
            Arc::clone(&self.decoder),
            Arc::clone(&self.key_fn),
            self.decode_failure_policy,
        )?;
        *state = HandlerState::Consuming;
        Ok(handle)
    }

    /// Publish messages; returns how many were sent
    pub fn publish<I>(&self, messages: I) -> QueueResult<usize>
    where
        I: IntoIterator<Item = Message<V>>,
    {
        let state = self.lock_state()?;
        self.ensure_open(*state, "publish")?;
        drop(state);
        self.publisher.publish(&self.queue, messages)
    }

    /// Publish plain values with default properties
    pub fn publish_values<I>(&self, values: I) -> QueueResult<usize>
    where
        I: IntoIterator<Item = V>,
    {
        self.publish(values.into_iter().map(Message::new))
    }

    /// Stop consuming; the handler may consume again later
    pub fn cancel(&self) -> QueueResult<()> {
        let mut state = self.lock_state()?;
        self.ensure_open(*state, "cancel")?;
        let handle = self
            .consumer
            .active_handle()?
            .ok_or_else(|| QueueError::subscription_state("consumer not started"))?;
        self.consumer.cancel(&handle)?;
        *state = HandlerState::Created;
        Ok(())
    }

    /// Stop consuming for good
    ///
    /// Closing twice is a no-op. The channel is left open for its owner.
    pub fn close(&self) -> QueueResult<()> {
        let mut state = self.lock_state()?;
        if *state == HandlerState::Closed {
            return Ok(());
        }
        log::debug!("closing queue handler for {}", self.queue);
        self.consumer.close()?;
        *state = HandlerState::Closed;
        Ok(())
    }

    /// Current lifecycle state; a poisoned state lock reads as `Closed`
    pub fn state(&self) -> HandlerState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(HandlerState::Closed)
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Delivery counters of the underlying consumer
    pub fn stats(&self) -> ConsumerStats {
        self.consumer.stats()
    }

    pub fn store(&self) -> &Arc<KeyedMessageStore<K, V>> {
        &self.store
    }

    /// Snapshot of everything indexed so far
    pub fn received_messages(&self) -> HashMap<K, Arc<Message<V>>> {
        self.store.snapshot()
    }

    /// Message currently stored under `key`, without waiting
    pub fn message(&self, key: &K) -> Option<Arc<Message<V>>> {
        self.store.get(key)
    }

    /// Poll the message stored under `key` until `matcher` accepts it
    pub fn eventually_message<M>(
        &self,
        key: &K,
        matcher: &M,
    ) -> Result<Option<Arc<Message<V>>>, TimeoutAssertionError>
    where
        M: Matcher<Option<Arc<Message<V>>>> + ?Sized,
        V: Debug,
    {
        eventually(|| self.store.get(key), matcher, &self.retry_policy)
    }

    /// Poll the whole store until `matcher` accepts a snapshot of it
    pub fn eventually_received<M>(
        &self,
        matcher: &M,
    ) -> Result<HashMap<K, Arc<Message<V>>>, TimeoutAssertionError>
    where
        M: Matcher<HashMap<K, Arc<Message<V>>>> + ?Sized,
        V: Debug,
    {
        eventually(|| self.store.snapshot(), matcher, &self.retry_policy)
    }
}

impl<K, V> Drop for QueueHandler<K, V> {
    fn drop(&mut self) {
        let open = self
            .state
            .lock()
            .map(|state| *state != HandlerState::Closed)
            .unwrap_or(false);
        if open {
            if let Err(e) = self.consumer.close() {
                log::error!("while closing queue handler for {} got {}", self.queue, e);
            }
        }
    }
}
