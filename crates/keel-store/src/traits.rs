use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use keel_types::StorageKey;

use crate::change::ChangeStream;
use crate::error::StoreResult;

/// Asynchronous key/value store with a store-wide change feed.
///
/// All implementations must satisfy these invariants:
/// - `get_many` returns only keys that are present; absent keys are omitted.
/// - `set_many` is all-or-nothing: on `Err` no key was written.
/// - A successful `set_many` publishes exactly one change naming its keys.
/// - Change events are store-wide; a subscriber receives events for every
///   key and filters for itself.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the given keys. Absent keys are omitted from the result.
    async fn get_many(&self, keys: &[StorageKey]) -> StoreResult<HashMap<StorageKey, Value>>;

    /// Write all entries, then publish one change naming their keys.
    async fn set_many(&self, entries: HashMap<StorageKey, Value>) -> StoreResult<()>;

    /// Read every key in the store.
    async fn get_all(&self) -> StoreResult<HashMap<StorageKey, Value>>;

    /// Subscribe to the store's change feed.
    fn subscribe(&self) -> ChangeStream;

    /// Read a single key.
    async fn get(&self, key: &StorageKey) -> StoreResult<Option<Value>> {
        let mut items = self.get_many(std::slice::from_ref(key)).await?;
        Ok(items.remove(key))
    }

    /// Write a single key.
    async fn set(&self, key: StorageKey, value: Value) -> StoreResult<()> {
        self.set_many(HashMap::from([(key, value)])).await
    }
}
