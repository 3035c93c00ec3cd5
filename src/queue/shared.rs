//! Lazily built, process-wide queue handler
//!
//! Step definitions in a test suite often need the same handler from many
//! places without agreeing on who creates it. A [`SharedQueueHandler`] holds
//! a factory and builds the handler on first use.

use crate::core::error_handling::log_error_with_context;
use crate::queue::error::QueueResult;
use crate::queue::handler::QueueHandler;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

type HandlerFactory<K, V> = Box<dyn Fn() -> QueueResult<QueueHandler<K, V>> + Send + Sync>;

/// Memoized [`QueueHandler`]
///
/// The factory runs until it succeeds once; every later `get` returns the
/// same instance. A failed build is reported to its caller and retried on
/// the next `get`.
///
/// # Example
///
/// ```rust
/// use mqverify::broker::InMemoryBroker;
/// use mqverify::queue::codec::{utf8_decoder, utf8_encoder};
/// use mqverify::queue::{QueueHandler, SharedQueueHandler};
/// use std::sync::Arc;
///
/// let broker = InMemoryBroker::new();
/// let queue = broker.declare_anonymous_queue().unwrap();
///
/// let shared = SharedQueueHandler::new(move || {
///     QueueHandler::builder()
///         .channel(Arc::new(broker.create_channel()?))
///         .queue(queue.clone())
///         .indexing_by_content(|s: &String| s.clone())
///         .consuming_by(utf8_decoder())
///         .publishing_by(utf8_encoder())
///         .build()
/// });
///
/// let first = shared.get().unwrap();
/// let second = shared.get().unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
pub struct SharedQueueHandler<K, V> {
    factory: HandlerFactory<K, V>,
    instance: OnceCell<Arc<QueueHandler<K, V>>>,
}

impl<K, V> fmt::Debug for SharedQueueHandler<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedQueueHandler")
            .field("initialised", &self.is_initialised())
            .finish()
    }
}

impl<K, V> SharedQueueHandler<K, V> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> QueueResult<QueueHandler<K, V>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            instance: OnceCell::new(),
        }
    }

    /// The shared handler, building it if needed
    ///
    /// Concurrent first calls block until one of them has built it.
    pub fn get(&self) -> QueueResult<Arc<QueueHandler<K, V>>> {
        self.instance
            .get_or_try_init(|| {
                log::debug!("building shared queue handler");
                (self.factory)().map(Arc::new).inspect_err(|e| {
                    log_error_with_context(e, "building shared queue handler");
                })
            })
            .map(Arc::clone)
    }

    pub fn is_initialised(&self) -> bool {
        self.instance.get().is_some()
    }
}
