//! Storage synchronization for Keel.
//!
//! Bridges an asynchronous [`KeyValueStore`](keel_store::KeyValueStore) to
//! synchronous-looking, typed cells:
//!
//! - [`StorageCache`] -- per-key cached value, fetched lazily, revalidated on demand
//! - [`ChangeNotifier`] -- turns the store's change feed into handler calls
//! - [`SyncedStorageCell`] -- read/write cell, revalidated on every change,
//!   written through to the store
//! - [`PassiveStorageCell`] -- local-first cell persisted write-behind
//! - [`StorageContext`] -- the per-execution-context handle that opens cells
//!
//! # Consistency
//!
//! A cell exposes either the last value confirmed by the store or a newer
//! value confirmed by its own write. Other contexts observe a write once
//! the change feed fires and their revalidation round trip completes.
//! Concurrent writers to one key race; the write that resolves last wins.

pub mod cache;
pub mod cell;
pub mod config;
pub mod context;
pub mod error;
pub mod notifier;
pub mod passive;

#[cfg(test)]
mod testing;

pub use cache::{Slot, StorageCache};
pub use cell::{SyncedStorageCell, Update};
pub use config::{NotifyMode, SyncConfig};
pub use context::StorageContext;
pub use error::{SyncError, SyncResult};
pub use notifier::{ChangeNotifier, Subscription, SubscriptionId};
pub use passive::PassiveStorageCell;
