use serde::{Deserialize, Serialize};

/// How a synced cell listens for store changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    /// Revalidate on every store-wide change, whatever keys it names.
    #[default]
    Broadcast,
    /// Revalidate only on changes that name the cell's key.
    Keyed,
}

/// Configuration for a [`StorageContext`](crate::StorageContext).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Change dispatch strategy for synced cells.
    pub notify_mode: NotifyMode,
    /// When `true`, a fetch that completes after a newer local write was
    /// confirmed for the same key is discarded and fetched again instead of
    /// overwriting it.
    /// When `false`, the last fetch to complete always wins, which can
    /// transiently roll a cell back until the next revalidation.
    pub discard_stale_fetches: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            notify_mode: NotifyMode::Broadcast,
            discard_stale_fetches: true,
        }
    }
}

impl SyncConfig {
    /// Last-fetch-wins revalidation with store-wide dispatch: every change
    /// revalidates every cell and no fetch result is ever dropped.
    pub fn last_fetch_wins() -> Self {
        Self {
            discard_stale_fetches: false,
            ..Default::default()
        }
    }
}
