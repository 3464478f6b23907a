use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use keel_store::KeyValueStore;
use keel_types::StorageKey;

use crate::cache::StorageCache;
use crate::cell::SyncedStorageCell;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::notifier::ChangeNotifier;
use crate::passive::PassiveStorageCell;

/// Storage handle for one execution context (a popup, a tab, the
/// background page).
///
/// Owns the context's [`StorageCache`] and a [`ChangeNotifier`] attached to
/// the store. Cells opened from the same context share cached values;
/// cells in different contexts over the same store converge through the
/// store's change feed.
pub struct StorageContext {
    store: Arc<dyn KeyValueStore>,
    cache: Arc<StorageCache>,
    notifier: ChangeNotifier,
    config: SyncConfig,
}

impl StorageContext {
    /// Create a context over `store`.
    ///
    /// Must be called from within a tokio runtime: the notifier's pump task
    /// is spawned on it.
    pub fn new(store: Arc<dyn KeyValueStore>, config: SyncConfig) -> Self {
        let notifier = ChangeNotifier::attach(store.as_ref());
        let cache = Arc::new(StorageCache::new(Arc::clone(&store), &config));
        info!(
            notify_mode = ?config.notify_mode,
            discard_stale_fetches = config.discard_stale_fetches,
            "storage context created"
        );
        Self {
            store,
            cache,
            notifier,
            config,
        }
    }

    /// Open a [`SyncedStorageCell`] on `key`.
    pub async fn open<T>(
        &self,
        key: impl Into<StorageKey>,
        fallback: Option<T>,
    ) -> SyncResult<SyncedStorageCell<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        SyncedStorageCell::open(self, key, fallback).await
    }

    /// Open a [`PassiveStorageCell`] on `key`.
    pub async fn open_passive<T>(
        &self,
        key: impl Into<StorageKey>,
        fallback: Option<T>,
    ) -> SyncResult<PassiveStorageCell<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        PassiveStorageCell::open(self, key, fallback).await
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<StorageCache> {
        &self.cache
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("cache", &self.cache)
            .field("notifier", &self.notifier)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_store::InMemoryKeyValueStore;
    use keel_types::{network_by_id, NETWORKS};
    use serde_json::json;

    #[tokio::test]
    async fn synced_and_passive_cells_share_a_store() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let ctx = StorageContext::new(store.clone(), SyncConfig::default());

        let network = ctx
            .open("wallet:network_id", Some(NETWORKS[0].id.to_string()))
            .await
            .unwrap();
        let draft = ctx.open_passive("wallet:draft", Some(0_u64)).await.unwrap();

        network.write("edonet".to_string()).await.unwrap();
        draft.set_local(42_u64);
        draft.flush().await;

        assert!(network_by_id(&network.read()).is_ok());
        assert_eq!(store.peek("wallet:network_id"), Some(json!("edonet")));
        assert_eq!(store.peek("wallet:draft"), Some(json!(42)));
    }

    #[tokio::test]
    async fn context_attaches_one_feed_subscriber() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let ctx = StorageContext::new(store.clone(), SyncConfig::default());
        assert_eq!(store.subscriber_count(), 1);
        let debug = format!("{ctx:?}");
        assert!(debug.contains("StorageContext"));
    }
}
