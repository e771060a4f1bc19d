//! Data keys naming event data produced and consumed by units.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Opaque identifier of a piece of event data.
///
/// Equality is by value. Keys are ordered only so that collections of them
/// can be iterated reproducibly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataKey(String);

impl DataKey {
    /// Create a new key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a key of the form `"a:b:c"` into its alternatives.
    ///
    /// A key without `:` yields itself.
    pub fn alternatives(&self) -> Vec<DataKey> {
        self.0
            .split(':')
            .filter(|part| !part.is_empty())
            .map(DataKey::new)
            .collect()
    }

    /// Whether this key lists alternatives.
    pub fn has_alternatives(&self) -> bool {
        self.0.contains(':')
    }
}

impl std::fmt::Display for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DataKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for DataKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
