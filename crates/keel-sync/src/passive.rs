use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use keel_store::KeyValueStore;
use keel_types::StorageKey;

use crate::context::StorageContext;
use crate::error::{encode, SyncResult};

enum Persist<T> {
    Value(Arc<T>),
    Flush(oneshot::Sender<()>),
}

/// Local-first cell persisted write-behind.
///
/// The cell's own value is authoritative: it is loaded once on open, never
/// revalidated on store changes, and updated synchronously by
/// [`set_local`](Self::set_local). Each update that produces a different
/// allocation (identity, not equality) is queued for persistence.
///
/// Persistence is best effort. A single background task writes queued
/// values in order, collapsing bursts to the latest value. A failed write
/// is logged and dropped: the store stays behind until the next successful
/// write, and [`read`](Self::read) is never affected.
pub struct PassiveStorageCell<T> {
    key: StorageKey,
    value: Mutex<Arc<T>>,
    queue: mpsc::UnboundedSender<Persist<T>>,
}

impl<T> PassiveStorageCell<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open a cell on `key`, waiting for the first value.
    pub async fn open(
        ctx: &StorageContext,
        key: impl Into<StorageKey>,
        fallback: Option<T>,
    ) -> SyncResult<Self> {
        let key = key.into();
        let initial: T = ctx.cache().get_as(&key, fallback).await?;

        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(write_behind(Arc::clone(ctx.store()), key.clone(), pending));

        debug!(key = %key, "passive cell opened");
        Ok(Self {
            key,
            value: Mutex::new(Arc::new(initial)),
            queue,
        })
    }

    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    /// The current local value.
    pub fn read(&self) -> Arc<T> {
        Arc::clone(&self.value.lock().expect("cell lock poisoned"))
    }

    /// Replace the local value. Passing back the `Arc` returned by
    /// [`read`](Self::read) is a no-op and persists nothing.
    pub fn set_local(&self, value: impl Into<Arc<T>>) {
        let value = value.into();
        self.update_local(move |_| value);
    }

    /// Replace the local value with a function of the current one.
    pub fn update_local<F>(&self, f: F)
    where
        F: FnOnce(&Arc<T>) -> Arc<T>,
    {
        let next = {
            let mut current = self.value.lock().expect("cell lock poisoned");
            let next = f(&current);
            if Arc::ptr_eq(&current, &next) {
                return;
            }
            *current = Arc::clone(&next);
            next
        };
        if self.queue.send(Persist::Value(next)).is_err() {
            warn!(key = %self.key, "write-behind task gone; value not persisted");
        }
    }

    /// Wait until every value queued so far has been written or dropped.
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        if self.queue.send(Persist::Flush(done)).is_ok() {
            let _ = flushed.await;
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PassiveStorageCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassiveStorageCell")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}

async fn write_behind<T: Serialize>(
    store: Arc<dyn KeyValueStore>,
    key: StorageKey,
    mut pending: mpsc::UnboundedReceiver<Persist<T>>,
) {
    while let Some(first) = pending.recv().await {
        let mut latest = None;
        let mut flushes = Vec::new();
        let mut next = Some(first);
        // Collapse everything already queued; flushes are answered after
        // the write that precedes them.
        while let Some(item) = next {
            match item {
                Persist::Value(value) => latest = Some(value),
                Persist::Flush(done) => flushes.push(done),
            }
            next = pending.try_recv().ok();
        }

        if let Some(value) = latest {
            persist(store.as_ref(), &key, value.as_ref()).await;
        }
        for done in flushes {
            let _ = done.send(());
        }
    }
    debug!(key = %key, "write-behind queue closed");
}

async fn persist<T: Serialize>(store: &dyn KeyValueStore, key: &StorageKey, value: &T) {
    let result: SyncResult<()> = match encode(key, value) {
        Ok(encoded) => store.set(key.clone(), encoded).await.map_err(Into::into),
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => debug!(key = %key, "write-behind persisted"),
        Err(err) => warn!(key = %key, error = %err, "write-behind persist failed; local value kept"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::testing::{settle, GatedStore};
    use keel_store::InMemoryKeyValueStore;
    use serde_json::json;

    fn context(store: Arc<dyn KeyValueStore>) -> StorageContext {
        StorageContext::new(store, SyncConfig::default())
    }

    #[tokio::test]
    async fn set_local_is_visible_synchronously() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let ctx = context(store.clone());
        let cell = ctx.open_passive("draft", Some(String::new())).await.unwrap();

        cell.set_local("hello".to_string());
        assert_eq!(*cell.read(), "hello");

        cell.flush().await;
        assert_eq!(store.peek("draft"), Some(json!("hello")));
    }

    #[tokio::test]
    async fn failed_persist_does_not_touch_local_value() {
        let store = Arc::new(InMemoryKeyValueStore::with_items([("draft", json!("a"))]));
        let ctx = context(store.clone());
        let cell = ctx.open_passive::<String>("draft", None).await.unwrap();

        store.fail_next_writes(1);
        cell.set_local("b".to_string());
        cell.flush().await;
        assert_eq!(*cell.read(), "b");
        assert_eq!(store.peek("draft"), Some(json!("a")));

        // The store catches up on the next successful write.
        cell.update_local(|s| Arc::new(format!("{s}c")));
        cell.flush().await;
        assert_eq!(store.peek("draft"), Some(json!("bc")));
    }

    #[tokio::test]
    async fn same_allocation_is_not_persisted() {
        let gated = Arc::new(GatedStore::new(InMemoryKeyValueStore::new()));
        let ctx = context(gated.clone());
        let cell = ctx.open_passive("n", Some(1_u32)).await.unwrap();

        cell.set_local(cell.read());
        cell.update_local(Arc::clone);
        cell.flush().await;
        assert_eq!(gated.write_count(), 0);

        // Equal content in a new allocation still counts as a change.
        cell.set_local(1_u32);
        cell.flush().await;
        assert_eq!(gated.write_count(), 1);
    }

    #[tokio::test]
    async fn burst_collapses_to_latest_value() {
        let gated = Arc::new(GatedStore::new(InMemoryKeyValueStore::new()));
        let ctx = context(gated.clone());
        let cell = ctx.open_passive("n", Some(0_u32)).await.unwrap();

        for i in 1..=10_u32 {
            cell.set_local(i);
        }
        assert_eq!(*cell.read(), 10);
        cell.flush().await;
        assert_eq!(gated.write_count(), 1);
        assert_eq!(gated.inner.peek("n"), Some(json!(10)));
    }

    #[tokio::test]
    async fn writes_land_in_order() {
        let gated = Arc::new(GatedStore::new(InMemoryKeyValueStore::new()));
        let ctx = context(gated.clone());
        let cell = ctx.open_passive("n", Some(0_u32)).await.unwrap();

        gated.writes.close();
        cell.set_local(1_u32);
        settle().await;
        // The first write is held; these queue behind it.
        cell.set_local(2_u32);
        cell.set_local(3_u32);
        gated.writes.open();
        cell.flush().await;
        assert_eq!(gated.inner.peek("n"), Some(json!(3)));
        assert_eq!(gated.write_count(), 2);
    }

    #[tokio::test]
    async fn external_changes_are_ignored() {
        let store = Arc::new(InMemoryKeyValueStore::with_items([("n", json!(1))]));
        let ctx = context(store.clone());
        let cell = ctx.open_passive::<u32>("n", None).await.unwrap();

        store.set("n".into(), json!(5)).await.unwrap();
        settle().await;
        assert_eq!(*cell.read(), 1);
    }

    #[tokio::test]
    async fn initial_value_is_not_persisted() {
        let gated = Arc::new(GatedStore::new(InMemoryKeyValueStore::new()));
        let ctx = context(gated.clone());
        let cell = ctx.open_passive("n", Some(0_u32)).await.unwrap();
        cell.flush().await;
        assert_eq!(gated.write_count(), 0);
        assert_eq!(gated.inner.peek("n"), None);
    }
}
