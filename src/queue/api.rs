//! Public API for the queue system
//!
//! Everything a test suite needs to publish, consume and assert, in one
//! import. See the [`crate::queue`] module documentation for usage.

// Handler and its parts
pub use crate::queue::consumer::{ConsumerHandle, ConsumerStats, DecodeFailurePolicy, MessageConsumer};
pub use crate::queue::handler::{HandlerState, QueueHandler, QueueHandlerBuilder};
pub use crate::queue::publisher::MessagePublisher;
pub use crate::queue::shared::SharedQueueHandler;
pub use crate::queue::store::KeyedMessageStore;

// Message types and codecs
pub use crate::queue::codec::{Decoder, Encoder, KeyFn};
pub use crate::queue::message::{Message, MessageProperties};

// Error handling
pub use crate::queue::error::{QueueError, QueueResult};

// Assertions
pub use crate::core::eventually::{eventually, eventually_that, TimeoutAssertionError};
pub use crate::core::matchers::{equal_to, has_len, present, present_and, satisfies, Matcher};
pub use crate::core::retry::{Backoff, RetryPolicy};
