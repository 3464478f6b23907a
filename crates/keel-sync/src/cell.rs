use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use keel_store::StorageChange;
use keel_types::StorageKey;

use crate::cache::{Slot, StorageCache};
use crate::config::NotifyMode;
use crate::context::StorageContext;
use crate::error::{decode, encode, SyncError, SyncResult};
use crate::notifier::Subscription;

/// New value for a cell: either a replacement or a function of the
/// current value.
pub enum Update<T> {
    Replace(T),
    Apply(Box<dyn FnOnce(&T) -> T + Send>),
}

impl<T> Update<T> {
    pub fn apply<F>(f: F) -> Self
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        Self::Apply(Box::new(f))
    }

    /// Resolve against the current value.
    pub fn resolve(self, current: &T) -> T {
        match self {
            Self::Replace(value) => value,
            Self::Apply(f) => f(current),
        }
    }
}

impl<T> From<T> for Update<T> {
    fn from(value: T) -> Self {
        Self::Replace(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Update<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace(value) => f.debug_tuple("Replace").field(value).finish(),
            Self::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

/// Read/write cell bound to one storage key, kept in sync with the store.
///
/// Every store change revalidates the cell's key (all changes in
/// [`NotifyMode::Broadcast`], changes naming the key in
/// [`NotifyMode::Keyed`]). Writes go through to the store and are visible
/// to [`read`](Self::read) as soon as the store confirms them; other cells
/// see them after their own revalidation.
///
/// Dropping the cell unregisters its change handler.
pub struct SyncedStorageCell<T> {
    key: StorageKey,
    fallback: Option<T>,
    cache: Arc<StorageCache>,
    updates: watch::Receiver<Slot>,
    // Last value this cell decoded or wrote. Served when the cached value
    // is undecodable.
    last: Mutex<T>,
    _subscription: Subscription,
}

impl<T> SyncedStorageCell<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open a cell on `key`, waiting for the first value.
    ///
    /// The change handler is registered before the initial read so no
    /// change is missed. If the initial read fails the handler is
    /// unregistered and the error returned.
    pub async fn open(
        ctx: &StorageContext,
        key: impl Into<StorageKey>,
        fallback: Option<T>,
    ) -> SyncResult<Self> {
        let key = key.into();
        let subscription = revalidate_on_change(ctx, &key);
        let cache = Arc::clone(ctx.cache());

        let initial: T = cache.get_as(&key, fallback.clone()).await?;
        let mut updates = cache.watch(&key);
        updates.borrow_and_update();

        debug!(key = %key, "synced cell opened");
        Ok(Self {
            key,
            fallback,
            cache,
            updates,
            last: Mutex::new(initial),
            _subscription: subscription,
        })
    }

    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    /// The current value: the fallback while the store has never held the
    /// key, otherwise the most recent cached value.
    pub fn read(&self) -> T {
        let cached = self.cache.peek(&self.key);
        let mut last = self.last.lock().expect("cell lock poisoned");
        match cached {
            Some(value) => match decode::<T>(&self.key, value) {
                Ok(value) => {
                    *last = value.clone();
                    value
                }
                Err(err) => {
                    warn!(key = %self.key, error = %err, "keeping last good value");
                    last.clone()
                }
            },
            None => self.fallback.clone().unwrap_or_else(|| last.clone()),
        }
    }

    /// Write a new value through to the store.
    ///
    /// A function update is applied to the freshest value this context
    /// knows. Once the store confirms, [`read`](Self::read) returns the new
    /// value without waiting for a change round trip. If the store rejects
    /// the write the error is returned and the cell keeps its previous
    /// value.
    pub async fn write(&self, update: impl Into<Update<T>>) -> SyncResult<()> {
        let next = match update.into() {
            Update::Replace(value) => value,
            apply => apply.resolve(&self.read()),
        };
        let encoded = encode(&self.key, &next)?;
        self.cache.write_through(&self.key, encoded).await?;
        *self.last.lock().expect("cell lock poisoned") = next;
        Ok(())
    }

    /// Write a function of the current value.
    pub async fn update<F>(&self, f: F) -> SyncResult<()>
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.write(Update::apply(f)).await
    }

    /// Wait until the cell's cached value changes, then return it.
    pub async fn changed(&mut self) -> SyncResult<T> {
        self.updates
            .changed()
            .await
            .map_err(|_| SyncError::Closed(self.key.clone()))?;
        Ok(self.read())
    }
}

impl<T: fmt::Debug> fmt::Debug for SyncedStorageCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedStorageCell")
            .field("key", &self.key)
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// Register a handler that revalidates `key` in the background whenever the
/// store reports a change.
fn revalidate_on_change(ctx: &StorageContext, key: &StorageKey) -> Subscription {
    let cache = Arc::clone(ctx.cache());
    let runtime = Handle::current();
    let target = key.clone();
    let handler = move |_: &StorageChange| {
        let cache = Arc::clone(&cache);
        let key = target.clone();
        runtime.spawn(async move {
            // Failure is logged by the cache; the next change or read retries.
            let _ = cache.revalidate(&key).await;
        });
    };
    match ctx.config().notify_mode {
        NotifyMode::Broadcast => ctx.notifier().subscribe(handler),
        NotifyMode::Keyed => ctx.notifier().subscribe_key(key.clone(), handler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::testing::{settle, GatedStore};
    use keel_store::{InMemoryKeyValueStore, KeyValueStore};
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn context(store: Arc<dyn KeyValueStore>) -> StorageContext {
        StorageContext::new(store, SyncConfig::default())
    }

    // -----------------------------------------------------------------------
    // Reads and fallbacks
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn counter_scenario() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let ctx = context(store.clone());

        let cell = ctx.open("count", Some(0_i64)).await.unwrap();
        assert_eq!(cell.read(), 0);

        cell.write(1_i64).await.unwrap();
        assert_eq!(cell.read(), 1);

        store.fail_next_writes(1);
        let err = cell.write(2_i64).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
        assert_eq!(cell.read(), 1);
        assert_eq!(store.peek("count"), Some(json!(1)));
    }

    #[tokio::test]
    async fn missing_key_without_fallback_fails_open() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let ctx = context(store);
        let err = ctx.open::<String>("name", None).await.unwrap_err();
        assert!(matches!(err, SyncError::Missing(_)));
        // The handler registered for the failed open is gone.
        assert_eq!(ctx.notifier().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn failed_cold_read_fails_open() {
        let store = Arc::new(InMemoryKeyValueStore::with_items([("x", json!("a"))]));
        let ctx = context(store.clone());
        store.fail_next_reads(1);
        assert!(ctx.open::<String>("x", None).await.is_err());
        assert_eq!(ctx.notifier().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn stored_value_wins_over_fallback() {
        let store = Arc::new(InMemoryKeyValueStore::with_items([("x", json!("a"))]));
        let ctx = context(store);
        let cell = ctx.open("x", Some("fallback".to_string())).await.unwrap();
        assert_eq!(cell.read(), "a");
    }

    #[tokio::test]
    async fn undecodable_update_keeps_last_good_value() {
        let store = Arc::new(InMemoryKeyValueStore::with_items([("count", json!(3))]));
        let ctx = context(store.clone());
        let mut cell = ctx.open("count", Some(0_i64)).await.unwrap();

        store.set("count".into(), json!("three")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), cell.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cell.read(), 3);
    }

    proptest! {
        #[test]
        fn absent_key_reads_fallback(key in "[a-z]{1,8}", fallback in any::<i64>()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let value = runtime.block_on(async {
                let ctx = context(Arc::new(InMemoryKeyValueStore::new()));
                let cell = ctx.open(key.as_str(), Some(fallback)).await.unwrap();
                cell.read()
            });
            prop_assert_eq!(value, fallback);
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn function_update_uses_freshest_value() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let ctx = context(store.clone());
        let cell = ctx.open("count", Some(0_i64)).await.unwrap();

        cell.update(|n| n + 1).await.unwrap();
        cell.update(|n| n + 1).await.unwrap();
        cell.write(Update::apply(|n: &i64| n * 10)).await.unwrap();
        assert_eq!(cell.read(), 20);
        assert_eq!(store.peek("count"), Some(json!(20)));
    }

    #[tokio::test]
    async fn cells_in_one_context_share_writes() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let ctx = context(store);
        let a = ctx.open("x", Some("a".to_string())).await.unwrap();
        let b = ctx.open("x", Some("a".to_string())).await.unwrap();

        a.write("b".to_string()).await.unwrap();
        assert_eq!(b.read(), "b");
    }

    #[tokio::test]
    async fn write_visible_in_other_context_after_change() {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(InMemoryKeyValueStore::with_items([("x", json!("a"))]));
        let popup = context(Arc::clone(&store));
        let background = context(Arc::clone(&store));

        let a = popup.open::<String>("x", None).await.unwrap();
        let mut b = background.open::<String>("x", None).await.unwrap();
        assert_eq!(b.read(), "a");

        a.write("b".to_string()).await.unwrap();
        assert_eq!(a.read(), "b");

        let seen = tokio::time::timeout(Duration::from_secs(1), b.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, "b");
        assert_eq!(b.read(), "b");
    }

    #[tokio::test]
    async fn write_settling_after_revalidation_wins() {
        let gated = Arc::new(GatedStore::new(InMemoryKeyValueStore::with_items([(
            "x",
            json!("a"),
        )])));
        let ctx = context(gated.clone());
        let cell = Arc::new(ctx.open::<String>("x", None).await.unwrap());

        gated.writes.close();
        let writer = tokio::spawn({
            let cell = Arc::clone(&cell);
            async move { cell.write("b".to_string()).await }
        });
        settle().await;

        // A change lands and its revalidation completes while the write is held.
        ctx.notifier().dispatch(&StorageChange::new(vec!["x".into()]));
        settle().await;
        assert_eq!(gated.read_count(), 2);
        assert_eq!(cell.read(), "a");

        gated.writes.open();
        writer.await.unwrap().unwrap();
        assert_eq!(cell.read(), "b");

        // The write's own change event revalidates to the same value.
        settle().await;
        assert_eq!(cell.read(), "b");
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn dropping_cell_unsubscribes() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let ctx = context(store);
        let cell = ctx.open("x", Some(1_u8)).await.unwrap();
        assert_eq!(ctx.notifier().subscriber_count(), 1);
        drop(cell);
        assert_eq!(ctx.notifier().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_mode_revalidates_on_unrelated_change() {
        let gated = Arc::new(GatedStore::new(InMemoryKeyValueStore::new()));
        let ctx = context(gated.clone());
        let _cell = ctx.open("x", Some(1_u8)).await.unwrap();
        assert_eq!(gated.read_count(), 1);

        gated.set("other".into(), json!(true)).await.unwrap();
        settle().await;
        assert_eq!(gated.read_count(), 2);
    }

    #[tokio::test]
    async fn keyed_mode_ignores_unrelated_change() {
        let gated = Arc::new(GatedStore::new(InMemoryKeyValueStore::new()));
        let config = SyncConfig {
            notify_mode: NotifyMode::Keyed,
            ..Default::default()
        };
        let ctx = StorageContext::new(gated.clone(), config);
        let cell = ctx.open("x", Some(1_u8)).await.unwrap();

        gated.set("other".into(), json!(true)).await.unwrap();
        settle().await;
        assert_eq!(gated.read_count(), 1);

        gated.set("x".into(), json!(2)).await.unwrap();
        settle().await;
        assert_eq!(gated.read_count(), 2);
        assert_eq!(cell.read(), 2);
    }

    #[test]
    fn update_debug() {
        assert_eq!(format!("{:?}", Update::from(3)), "Replace(3)");
        assert_eq!(format!("{:?}", Update::apply(|n: &i32| n + 1)), "Apply(..)");
    }
}
