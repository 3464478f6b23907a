use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use keel_types::StorageKey;

use crate::change::{ChangeFeed, ChangeStream, StorageChange, DEFAULT_FEED_CAPACITY};
use crate::error::{StoreError, StoreResult};
use crate::traits::KeyValueStore;

/// Key/value store persisted as a single JSON object on disk.
///
/// The whole document is held in memory and rewritten on every
/// `set_many`: the new document goes to a temporary file in the same
/// directory, which then replaces the original by rename. A crash
/// mid-write therefore leaves either the old or the new document, never a
/// torn one. Writes are serialized; reads never touch the disk.
pub struct FileKeyValueStore {
    path: PathBuf,
    items: RwLock<HashMap<StorageKey, Value>>,
    write_lock: tokio::sync::Mutex<()>,
    feed: ChangeFeed,
}

impl FileKeyValueStore {
    /// Open (or create on first write) the store document at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_capacity(path, DEFAULT_FEED_CAPACITY)
    }

    /// Open the store with a change feed buffering `capacity` events.
    pub fn open_with_capacity(path: impl AsRef<Path>, capacity: usize) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let items = if path.exists() {
            load_document(&path)?
        } else {
            HashMap::new()
        };
        info!(path = %path.display(), keys = items.len(), "file store opened");
        Ok(Self {
            path,
            items: RwLock::new(items),
            write_lock: tokio::sync::Mutex::new(()),
            feed: ChangeFeed::new(capacity),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_document(path: &Path) -> StoreResult<HashMap<StorageKey, Value>> {
    let bytes = std::fs::read(path)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(HashMap::new());
    }
    let document: Value = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    match document {
        Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        other => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get_many(&self, keys: &[StorageKey]) -> StoreResult<HashMap<StorageKey, Value>> {
        let items = self.items.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .filter_map(|k| items.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set_many(&self, entries: HashMap<StorageKey, Value>) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut keys: Vec<StorageKey> = entries.keys().cloned().collect();
        keys.sort();

        let mut next = self.items.read().expect("lock poisoned").clone();
        next.extend(entries);

        // Sorted output keeps the document diffable.
        let bytes = {
            let ordered: BTreeMap<&str, &Value> =
                next.iter().map(|(k, v)| (k.as_str(), v)).collect();
            serde_json::to_vec_pretty(&ordered)?
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;

        *self.items.write().expect("lock poisoned") = next;
        debug!(path = %self.path.display(), count = keys.len(), "file store written");
        self.feed.publish(StorageChange::new(keys));
        Ok(())
    }

    async fn get_all(&self) -> StoreResult<HashMap<StorageKey, Value>> {
        Ok(self.items.read().expect("lock poisoned").clone())
    }

    fn subscribe(&self) -> ChangeStream {
        self.feed.subscribe()
    }
}

impl std::fmt::Debug for FileKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeyValueStore")
            .field("path", &self.path)
            .finish()
    }
}
