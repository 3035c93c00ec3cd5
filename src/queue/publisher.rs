//! Message Publisher
//!
//! Encodes messages and sends them to a broker queue from a bounded pool of
//! scoped worker threads. `publish` returns only after every send has
//! returned. Delivery order across a parallel publish is not preserved.

use crate::broker::BrokerChannel;
use crate::queue::codec::Encoder;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::message::Message;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Concurrent sends per publish call
pub const DEFAULT_PUBLISH_PARALLELISM: usize = 4;

#[derive(Default)]
struct WorkerOutcome {
    sent: usize,
    first_error: Option<(usize, QueueError)>,
}

impl WorkerOutcome {
    fn record_error(&mut self, index: usize, error: QueueError) {
        match &self.first_error {
            Some((seen, _)) if *seen <= index => {}
            _ => self.first_error = Some((index, error)),
        }
    }

    fn merge(mut self, other: WorkerOutcome) -> WorkerOutcome {
        self.sent += other.sent;
        if let Some((index, error)) = other.first_error {
            self.record_error(index, error);
        }
        self
    }
}

/// Sends encoded messages to a queue
///
/// # Example
///
/// ```rust
/// use mqverify::broker::InMemoryBroker;
/// use mqverify::queue::codec::utf8_encoder;
/// use mqverify::queue::MessagePublisher;
/// use std::sync::Arc;
///
/// let broker = InMemoryBroker::new();
/// let queue = broker.declare_anonymous_queue().unwrap();
/// let channel = Arc::new(broker.create_channel().unwrap());
///
/// let publisher = MessagePublisher::new(channel, utf8_encoder());
/// let sent = publisher
///     .publish_values(&queue, vec!["a".to_string(), "b".to_string()])
///     .unwrap();
/// assert_eq!(sent, 2);
/// assert_eq!(broker.queue_depth(&queue), 2);
/// ```
pub struct MessagePublisher<V> {
    channel: Arc<dyn BrokerChannel>,
    encoder: Encoder<V>,
    parallelism: usize,
}

impl<V> fmt::Debug for MessagePublisher<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePublisher")
            .field("channel", &self.channel.id())
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

impl<V> MessagePublisher<V>
where
    V: Send + Sync,
{
    /// Publisher with [`DEFAULT_PUBLISH_PARALLELISM`] workers
    pub fn new(channel: Arc<dyn BrokerChannel>, encoder: Encoder<V>) -> Self {
        Self {
            channel,
            encoder,
            parallelism: DEFAULT_PUBLISH_PARALLELISM,
        }
    }

    /// Set the number of concurrent sends; values below 1 mean 1
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Encode and send every message, returning how many were sent
    ///
    /// A failing message does not stop the others. When any send or encode
    /// fails, the error of the earliest failing message is returned after all
    /// sends have completed.
    pub fn publish<I>(&self, queue: &str, messages: I) -> QueueResult<usize>
    where
        I: IntoIterator<Item = Message<V>>,
    {
        self.publish_with(queue, messages.into_iter().collect(), self.parallelism)
    }

    /// Publish plain values with default properties
    pub fn publish_values<I>(&self, queue: &str, values: I) -> QueueResult<usize>
    where
        I: IntoIterator<Item = V>,
    {
        self.publish(queue, values.into_iter().map(Message::new))
    }

    /// Publish one message at a time, preserving order
    pub fn publish_sequential<I>(&self, queue: &str, messages: I) -> QueueResult<usize>
    where
        I: IntoIterator<Item = Message<V>>,
    {
        self.publish_with(queue, messages.into_iter().collect(), 1)
    }

    fn publish_with(
        &self,
        queue: &str,
        messages: Vec<Message<V>>,
        parallelism: usize,
    ) -> QueueResult<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        let workers = parallelism.min(messages.len());
        log::debug!(
            "publishing {} messages to {} with {} workers",
            messages.len(),
            queue,
            workers
        );

        let next = AtomicUsize::new(0);
        let outcome = if workers == 1 {
            self.drain(queue, &messages, &next)
        } else {
            thread::scope(|scope| -> QueueResult<WorkerOutcome> {
                let mut spawned = Vec::with_capacity(workers);
                for worker in 0..workers {
                    let handle = thread::Builder::new()
                        .name(format!("publish-{worker}"))
                        .spawn_scoped(scope, || self.drain(queue, &messages, &next))
                        .map_err(|e| QueueError::Transport {
                            message: format!("cannot start publisher thread: {e}"),
                        })?;
                    spawned.push(handle);
                }

                let mut total = WorkerOutcome::default();
                for handle in spawned {
                    let outcome = handle.join().map_err(|_| QueueError::Transport {
                        message: "publisher thread panicked".to_string(),
                    })?;
                    total = total.merge(outcome);
                }
                Ok(total)
            })?
        };

        match outcome.first_error {
            Some((index, error)) => {
                log::warn!(
                    "published {} of {} messages to {}; message {} failed: {}",
                    outcome.sent,
                    messages.len(),
                    queue,
                    index,
                    error
                );
                Err(error)
            }
            None => Ok(outcome.sent),
        }
    }

    fn drain(&self, queue: &str, messages: &[Message<V>], next: &AtomicUsize) -> WorkerOutcome {
        let mut outcome = WorkerOutcome::default();
        loop {
            let index = next.fetch_add(1, Ordering::Relaxed);
            let Some(message) = messages.get(index) else {
                break;
            };
            match self.send(queue, message) {
                Ok(()) => outcome.sent += 1,
                Err(e) => outcome.record_error(index, e),
            }
        }
        outcome
    }

    fn send(&self, queue: &str, message: &Message<V>) -> QueueResult<()> {
        let body = (self.encoder)(&message.content)?;
        log::trace!("publishing {} bytes to {}", body.len(), queue);
        self.channel.send(queue, body, &message.properties)?;
        Ok(())
    }
}
