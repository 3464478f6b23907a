use keel_store::StoreError;
use keel_types::StorageKey;

/// Errors produced by the synchronization layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The key is absent from the store and the caller supplied no fallback.
    #[error("no value stored for {0} and no fallback given")]
    Missing(StorageKey),

    /// The stored value does not decode as the requested type.
    #[error("cannot decode value of {key}: {reason}")]
    Decode { key: StorageKey, reason: String },

    /// The value cannot be encoded for storage.
    #[error("cannot encode value for {key}: {reason}")]
    Encode { key: StorageKey, reason: String },

    /// The cache entry backing a cell is gone.
    #[error("cache entry for {0} closed")]
    Closed(StorageKey),
}

/// Result alias for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    key: &StorageKey,
    value: serde_json::Value,
) -> SyncResult<T> {
    serde_json::from_value(value).map_err(|e| SyncError::Decode {
        key: key.clone(),
        reason: e.to_string(),
    })
}

pub(crate) fn encode<T: serde::Serialize>(
    key: &StorageKey,
    value: &T,
) -> SyncResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| SyncError::Encode {
        key: key.clone(),
        reason: e.to_string(),
    })
}
