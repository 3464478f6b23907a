use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator used by [`StorageKey::namespaced`].
pub const NAMESPACE_SEPARATOR: char = ':';

/// Identifier of one logical value in the key/value store.
///
/// Keys are opaque strings. Namespacing is a convention of the embedding
/// application and is not enforced here: any string, including the empty
/// one, is a valid key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    /// Create a key from any string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Join a namespace and a name, e.g. `("wallet", "network_id")` becomes
    /// `wallet:network_id`.
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}{NAMESPACE_SEPARATOR}{name}"))
    }

    /// The namespace part of the key, if it has one.
    pub fn namespace(&self) -> Option<&str> {
        self.0
            .split_once(NAMESPACE_SEPARATOR)
            .map(|(namespace, _)| namespace)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for StorageKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StorageKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
