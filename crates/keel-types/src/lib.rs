//! Foundation types for Keel.
//!
//! This crate holds the vocabulary shared by every other Keel crate: the
//! [`StorageKey`] that names a persisted value, and the static wallet
//! definitions that the extension persists and exchanges through the
//! storage layer.
//!
//! # Key Types
//!
//! - [`StorageKey`] -- identifier of one logical value in the key/value store
//! - [`Network`] -- entry of the built-in network catalog ([`NETWORKS`])
//! - [`WalletRequest`] / [`WalletResponse`] / [`WalletNotification`] -- internal
//!   extension messages
//! - [`MessageType`] -- wire tag carried by every message

pub mod error;
pub mod key;
pub mod message;
pub mod network;

pub use error::TypeError;
pub use key::StorageKey;
pub use message::{
    MessageType, WalletAccount, WalletFrontState, WalletNotification, WalletRequest, WalletResponse,
    WalletStatus,
};
pub use network::{network_by_id, Network, NetworkKind, NETWORKS};
