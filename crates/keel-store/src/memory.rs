use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use keel_types::StorageKey;

use crate::change::{ChangeFeed, ChangeStream, StorageChange, DEFAULT_FEED_CAPACITY};
use crate::error::{StoreError, StoreResult};
use crate::traits::KeyValueStore;

/// In-memory, HashMap-based key/value store.
///
/// Intended for tests and embedding. Values are held behind a `RwLock` and
/// cloned on read. Failures can be injected with [`fail_next_reads`] and
/// [`fail_next_writes`] to exercise error paths of the layers above.
///
/// [`fail_next_reads`]: InMemoryKeyValueStore::fail_next_reads
/// [`fail_next_writes`]: InMemoryKeyValueStore::fail_next_writes
pub struct InMemoryKeyValueStore {
    items: RwLock<HashMap<StorageKey, Value>>,
    feed: ChangeFeed,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl InMemoryKeyValueStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create a new empty store whose change feed buffers `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            feed: ChangeFeed::new(capacity),
            failing_reads: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Create a store pre-populated with `items`. No change is published.
    pub fn with_items<I, K>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<StorageKey>,
    {
        let store = Self::new();
        store
            .items
            .write()
            .expect("lock poisoned")
            .extend(items.into_iter().map(|(k, v)| (k.into(), v)));
        store
    }

    /// Make the next `n` reads fail with [`StoreError::Unavailable`].
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.items.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.items.read().expect("lock poisoned").is_empty()
    }

    /// Synchronous read of a single key, bypassing failure injection.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.items.read().expect("lock poisoned").get(key).cloned()
    }

    /// Number of live change subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    fn take_injected(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get_many(&self, keys: &[StorageKey]) -> StoreResult<HashMap<StorageKey, Value>> {
        if Self::take_injected(&self.failing_reads) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        let items = self.items.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .filter_map(|k| items.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set_many(&self, entries: HashMap<StorageKey, Value>) -> StoreResult<()> {
        if Self::take_injected(&self.failing_writes) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        let mut keys: Vec<StorageKey> = entries.keys().cloned().collect();
        keys.sort();
        {
            let mut items = self.items.write().expect("lock poisoned");
            items.extend(entries);
        }
        debug!(count = keys.len(), "in-memory store written");
        self.feed.publish(StorageChange::new(keys));
        Ok(())
    }

    async fn get_all(&self) -> StoreResult<HashMap<StorageKey, Value>> {
        if Self::take_injected(&self.failing_reads) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(self.items.read().expect("lock poisoned").clone())
    }

    fn subscribe(&self) -> ChangeStream {
        self.feed.subscribe()
    }
}

impl std::fmt::Debug for InMemoryKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyValueStore")
            .field("key_count", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
