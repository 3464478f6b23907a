//! Key/value storage backends for Keel.
//!
//! The storage layer treats persistence as an opaque asynchronous map from
//! [`StorageKey`](keel_types::StorageKey) to JSON values, plus a store-wide
//! change feed. This is the shape of a browser extension's local storage
//! area: batched get/set and an `onChanged` event that fires for any key.
//!
//! # Storage Backends
//!
//! All backends implement the [`KeyValueStore`] trait:
//!
//! - [`InMemoryKeyValueStore`] -- `HashMap`-based store for tests and embedding,
//!   with failure injection for exercising error paths
//! - [`FileKeyValueStore`] -- a single JSON document on disk, replaced atomically
//!
//! # Design Rules
//!
//! 1. `get_many` omits absent keys; it never fills them with `null`.
//! 2. Every successful `set_many` publishes one [`StorageChange`] naming the
//!    written keys, to every subscriber, including the writer's own context.
//! 3. Change events carry no payload guarantee; consumers refetch.
//! 4. A failed `set_many` leaves the store unchanged and publishes nothing.

pub mod change;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use change::{ChangeFeed, ChangeStream, StorageChange, DEFAULT_FEED_CAPACITY};
pub use error::{StoreError, StoreResult};
pub use file::FileKeyValueStore;
pub use memory::InMemoryKeyValueStore;
pub use traits::KeyValueStore;
