use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use keel_store::KeyValueStore;
use keel_types::StorageKey;

use crate::config::SyncConfig;
use crate::error::{decode, SyncError, SyncResult};

/// Cached state of one key, published to dependents through a watch channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Slot {
    value: Option<Value>,
    loaded: bool,
    stale: bool,
    write_seq: u64,
}

impl Slot {
    /// Last known value; `None` if the store has no value or nothing was
    /// loaded yet.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Number of local writes confirmed for this key.
    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    fn fresh(&self) -> Option<Option<Value>> {
        (self.loaded && !self.stale).then(|| self.value.clone())
    }
}

struct CacheEntry {
    slot: watch::Sender<Slot>,
    // Serializes cold loads so concurrent first readers share one fetch.
    load: tokio::sync::Mutex<()>,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            slot: watch::channel(Slot::default()).0,
            load: tokio::sync::Mutex::new(()),
        }
    }
}

/// Per-key cache of store values with revalidation on demand.
///
/// Entries are created on first use and live as long as the cache. Every
/// change to an entry's value is published to receivers obtained from
/// [`watch`](Self::watch).
///
/// Fetches and local writes may overlap. Among fetches the last to complete
/// wins. A fetch that started before a local write was confirmed is
/// discarded and reissued when it completes, unless
/// `discard_stale_fetches` is off.
pub struct StorageCache {
    store: Arc<dyn KeyValueStore>,
    entries: RwLock<HashMap<StorageKey, Arc<CacheEntry>>>,
    discard_stale_fetches: bool,
}

impl StorageCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            discard_stale_fetches: config.discard_stale_fetches,
        }
    }

    fn entry(&self, key: &StorageKey) -> Arc<CacheEntry> {
        if let Some(entry) = self.existing(key) {
            return entry;
        }
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CacheEntry::new()));
        Arc::clone(entry)
    }

    fn existing(&self, key: &StorageKey) -> Option<Arc<CacheEntry>> {
        self.entries
            .read()
            .expect("cache lock poisoned")
            .get(key)
            .cloned()
    }

    /// The cached value of `key`, fetching it from the store if it was
    /// never loaded or has been invalidated.
    ///
    /// Waits for the fetch on a cold key. An absent key yields `fallback`,
    /// or [`SyncError::Missing`] when there is none. A failed fetch
    /// propagates and leaves the entry unloaded.
    pub async fn get(&self, key: &StorageKey, fallback: Option<Value>) -> SyncResult<Value> {
        match self.load(key).await? {
            Some(value) => Ok(value),
            None => fallback.ok_or_else(|| SyncError::Missing(key.clone())),
        }
    }

    /// Typed [`get`](Self::get).
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        key: &StorageKey,
        fallback: Option<T>,
    ) -> SyncResult<T> {
        match self.load(key).await? {
            Some(value) => decode(key, value),
            None => fallback.ok_or_else(|| SyncError::Missing(key.clone())),
        }
    }

    async fn load(&self, key: &StorageKey) -> SyncResult<Option<Value>> {
        let entry = self.entry(key);
        let cached = entry.slot.borrow().fresh();
        if let Some(value) = cached {
            return Ok(value);
        }
        let _loading = entry.load.lock().await;
        let cached = entry.slot.borrow().fresh();
        if let Some(value) = cached {
            return Ok(value);
        }
        self.refresh(key, &entry).await
    }

    /// Fetch `key` and apply the result to `entry`, returning the entry's
    /// value afterwards.
    ///
    /// A fetch overtaken by a local write is discarded and issued again,
    /// so the entry always settles on a fetch that started after the last
    /// confirmed write. Terminates once a fetch completes with no local
    /// write confirmed in between.
    async fn refresh(&self, key: &StorageKey, entry: &CacheEntry) -> SyncResult<Option<Value>> {
        let discard = self.discard_stale_fetches;
        loop {
            let started_at = entry.slot.borrow().write_seq;
            let fetched = self.store.get(key).await?;

            let mut overtaken = false;
            entry.slot.send_if_modified(|slot| {
                if discard && slot.write_seq != started_at {
                    overtaken = true;
                    return false;
                }
                let changed = !slot.loaded || slot.value != fetched;
                slot.value = fetched;
                slot.loaded = true;
                slot.stale = false;
                changed
            });
            if !overtaken {
                break;
            }
            debug!(key = %key, "fetch overtaken by local write; refetching");
        }

        let value = entry.slot.borrow().value.clone();
        Ok(value)
    }

    /// Invalidate `key` and refetch it now, notifying dependents if the
    /// value changed.
    ///
    /// On failure the entry stays invalidated, so the next [`get`] retries
    /// the fetch. A key nobody has read is not cached and is left alone.
    ///
    /// [`get`]: Self::get
    pub async fn revalidate(&self, key: &StorageKey) -> SyncResult<()> {
        let Some(entry) = self.existing(key) else {
            return Ok(());
        };
        entry.slot.send_if_modified(|slot| {
            slot.stale = true;
            false
        });
        match self.refresh(key, &entry).await {
            Ok(_) => {
                debug!(key = %key, "revalidated");
                Ok(())
            }
            Err(err) => {
                warn!(key = %key, error = %err, "revalidation failed");
                Err(err)
            }
        }
    }

    /// Write `value` to the store, then make it the cached value.
    ///
    /// Nothing local changes if the store rejects the write.
    pub async fn write_through(&self, key: &StorageKey, value: Value) -> SyncResult<()> {
        self.store.set(key.clone(), value.clone()).await?;
        let entry = self.entry(key);
        entry.slot.send_modify(|slot| {
            slot.value = Some(value);
            slot.loaded = true;
            slot.stale = false;
            slot.write_seq += 1;
        });
        debug!(key = %key, "write confirmed");
        Ok(())
    }

    /// Synchronous snapshot of the cached value.
    pub fn peek(&self, key: &StorageKey) -> Option<Value> {
        let entry = self.existing(key)?;
        let value = entry.slot.borrow().value.clone();
        value
    }

    /// Receiver notified whenever the cached value of `key` changes.
    pub fn watch(&self, key: &StorageKey) -> watch::Receiver<Slot> {
        self.entry(key).slot.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for StorageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCache")
            .field("entries", &self.len())
            .field("discard_stale_fetches", &self.discard_stale_fetches)
            .finish()
    }
}
