use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use keel_store::{ChangeStream, KeyValueStore, StorageChange};
use keel_types::StorageKey;

/// Callback invoked for a store change.
pub type ChangeHandler = Arc<dyn Fn(&StorageChange) + Send + Sync>;

/// Identifier of one registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handler table shared by the notifier, its pump task and every
/// outstanding [`Subscription`].
struct Registry {
    next_id: AtomicU64,
    broadcast: RwLock<Vec<(SubscriptionId, ChangeHandler)>>,
    keyed: RwLock<HashMap<StorageKey, Vec<(SubscriptionId, ChangeHandler)>>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            broadcast: RwLock::new(Vec::new()),
            keyed: RwLock::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn remove(&self, id: SubscriptionId, key: Option<&StorageKey>) {
        match key {
            None => self
                .broadcast
                .write()
                .expect("registry lock poisoned")
                .retain(|(sid, _)| *sid != id),
            Some(key) => {
                let mut keyed = self.keyed.write().expect("registry lock poisoned");
                if let Some(handlers) = keyed.get_mut(key) {
                    handlers.retain(|(sid, _)| *sid != id);
                    if handlers.is_empty() {
                        keyed.remove(key);
                    }
                }
            }
        }
    }

    /// Handlers interested in `change`. Collected under the lock and called
    /// after it is released, so a handler may subscribe or unsubscribe.
    fn interested(&self, change: &StorageChange) -> Vec<ChangeHandler> {
        let mut handlers: Vec<ChangeHandler> = self
            .broadcast
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        // A key named twice still runs its handlers once.
        let mut keys: Vec<&StorageKey> = change.keys.iter().collect();
        keys.sort();
        keys.dedup();
        let keyed = self.keyed.read().expect("registry lock poisoned");
        for key in keys {
            if let Some(entries) = keyed.get(key) {
                handlers.extend(entries.iter().map(|(_, h)| Arc::clone(h)));
            }
        }
        handlers
    }

    fn dispatch(&self, change: &StorageChange) -> usize {
        let handlers = self.interested(change);
        for handler in &handlers {
            handler(change);
        }
        debug!(keys = change.keys.len(), handlers = handlers.len(), "change dispatched");
        handlers.len()
    }

    /// Dispatch a change naming every key that has a keyed handler. Used
    /// when events were lost and any key may have changed.
    fn dispatch_everything(&self) -> usize {
        let mut keys: Vec<StorageKey> = self
            .keyed
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        self.dispatch(&StorageChange::new(keys))
    }

    fn count(&self) -> usize {
        let broadcast = self.broadcast.read().expect("registry lock poisoned").len();
        let keyed: usize = self
            .keyed
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(Vec::len)
            .sum();
        broadcast + keyed
    }
}

/// Adapts a store's change feed into handler calls.
///
/// Handlers registered with [`subscribe`](Self::subscribe) run on every
/// store-wide change; handlers registered with
/// [`subscribe_key`](Self::subscribe_key) run only for changes naming their
/// key. Each registration returns a [`Subscription`] guard that removes the
/// handler when dropped.
///
/// Registering the same logical subscriber twice is a caller error: both
/// registrations stay live and the handler runs twice per change.
pub struct ChangeNotifier {
    registry: Arc<Registry>,
    pump: Option<JoinHandle<()>>,
}

impl ChangeNotifier {
    /// A notifier with no feed attached. Changes reach it only through
    /// [`dispatch`](Self::dispatch).
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            pump: None,
        }
    }

    /// A notifier fed by `store`'s change feed.
    ///
    /// Spawns a pump task on the current tokio runtime; dropping the
    /// notifier stops it.
    pub fn attach(store: &dyn KeyValueStore) -> Self {
        let registry = Arc::new(Registry::new());
        let pump = tokio::spawn(pump(store.subscribe(), Arc::downgrade(&registry)));
        Self {
            registry,
            pump: Some(pump),
        }
    }

    /// Run `handler` on every store change until the returned guard drops.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        self.registry
            .broadcast
            .write()
            .expect("registry lock poisoned")
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            key: None,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Run `handler` on changes that name `key` until the returned guard
    /// drops.
    pub fn subscribe_key<F>(&self, key: StorageKey, handler: F) -> Subscription
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        self.registry
            .keyed
            .write()
            .expect("registry lock poisoned")
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            key: Some(key),
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `change` to interested handlers. Returns how many ran.
    pub fn dispatch(&self, change: &StorageChange) -> usize {
        self.registry.dispatch(change)
    }

    /// Number of live handlers, broadcast and keyed.
    pub fn subscriber_count(&self) -> usize {
        self.registry.count()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .field("attached", &self.pump.is_some())
            .finish()
    }
}

async fn pump(mut stream: ChangeStream, registry: Weak<Registry>) {
    loop {
        let received = stream.recv().await;
        let Some(registry) = registry.upgrade() else {
            break;
        };
        match received {
            Ok(change) => {
                registry.dispatch(&change);
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "change feed lagged; treating every key as changed");
                registry.dispatch_everything();
            }
            Err(RecvError::Closed) => {
                debug!("change feed closed");
                break;
            }
        }
    }
}

/// Registration guard returned by [`ChangeNotifier`].
///
/// The handler stays registered exactly as long as this value lives, so it
/// is released on every exit path of its owner.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    id: SubscriptionId,
    key: Option<StorageKey>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The key this subscription is bound to, if keyed.
    pub fn key(&self) -> Option<&StorageKey> {
        self.key.as_ref()
    }

    /// Unregister now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id, self.key.as_ref());
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}
