//! Test doubles for the synchronization layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use keel_store::{ChangeStream, InMemoryKeyValueStore, KeyValueStore, StoreResult};
use keel_types::StorageKey;

/// Let spawned tasks on the current-thread runtime run to quiescence.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// A gate that async operations wait on while it is closed.
pub(crate) struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: watch::channel(true).0,
        }
    }

    pub(crate) fn close(&self) {
        self.open.send_replace(false);
    }

    pub(crate) fn open(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        // The sender outlives every waiter.
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// In-memory store whose reads and writes can be held mid-flight.
///
/// A held read has already taken its snapshot of the store, so releasing
/// it later delivers a value that may be out of date. A write held at
/// `writes` has not touched the store yet; one held at `acks` has been
/// applied and published but not yet acknowledged to its caller.
pub(crate) struct GatedStore {
    pub(crate) inner: InMemoryKeyValueStore,
    pub(crate) reads: Gate,
    pub(crate) writes: Gate,
    pub(crate) acks: Gate,
    read_count: AtomicUsize,
    write_count: AtomicUsize,
}

impl GatedStore {
    pub(crate) fn new(inner: InMemoryKeyValueStore) -> Self {
        Self {
            inner,
            reads: Gate::new(),
            writes: Gate::new(),
            acks: Gate::new(),
            read_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub(crate) fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for GatedStore {
    async fn get_many(&self, keys: &[StorageKey]) -> StoreResult<HashMap<StorageKey, Value>> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.inner.get_many(keys).await;
        self.reads.pass().await;
        snapshot
    }

    async fn set_many(&self, entries: HashMap<StorageKey, Value>) -> StoreResult<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.writes.pass().await;
        self.inner.set_many(entries).await?;
        self.acks.pass().await;
        Ok(())
    }

    async fn get_all(&self) -> StoreResult<HashMap<StorageKey, Value>> {
        self.inner.get_all().await
    }

    fn subscribe(&self) -> ChangeStream {
        self.inner.subscribe()
    }
}
