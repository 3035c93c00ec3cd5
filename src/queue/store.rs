//! Keyed message store
//!
//! Holds the most recent delivery per derived key. Written by consumer
//! callbacks on broker threads, read by the test thread while polling.

use crate::queue::message::Message;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Concurrent last-write-wins map from key to message
///
/// Backed by a sharded [`DashMap`], so writers on different shards never
/// contend and readers never wait for the whole map. Only the consumer
/// side of this crate can write; callers get read-only access.
pub struct KeyedMessageStore<K, V> {
    messages: DashMap<K, Arc<Message<V>>>,
}

impl<K, V> Default for KeyedMessageStore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> fmt::Debug for KeyedMessageStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedMessageStore")
            .field("len", &self.messages.len())
            .finish()
    }
}

impl<K, V> KeyedMessageStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
        }
    }

    /// Insert or replace the message for `key`; the later write wins
    pub(crate) fn put(&self, key: K, message: Message<V>) {
        self.messages.insert(key, Arc::new(message));
    }

    /// Current message for `key`, or `None` if not yet observed
    pub fn get(&self, key: &K) -> Option<Arc<Message<V>>> {
        self.messages.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a message has been stored under `key`
    pub fn contains_key(&self, key: &K) -> bool {
        self.messages.contains_key(key)
    }

    /// Number of distinct keys stored
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Point-in-time copy of the store
    ///
    /// Each entry is consistent; the copy as a whole is not atomic with
    /// respect to concurrent writers.
    pub fn snapshot(&self) -> HashMap<K, Arc<Message<V>>>
    where
        K: Clone,
    {
        self.messages
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Keys stored so far, in no particular order
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.messages.iter().map(|entry| entry.key().clone()).collect()
    }
}
