// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key-value persistence used for session tokens.
//!
//! The client only needs a small string store with `get`/`set`/`remove` and
//! key enumeration. Two implementations are provided:
//!
//! - [`MemoryStore`]: process-lifetime storage, the default
//! - [`JsonFileStore`]: a single JSON file that survives restarts
//!
//! Callers may plug in their own backend by implementing [`KeyValueStore`].

mod file;

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::StorageError;

pub use file::JsonFileStore;

/// A string key-value store.
///
/// Implementations report failures (unavailable backend, quota exceeded)
/// as [`StorageError`]; the client degrades gracefully on every error.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Lists all stored keys.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory [`KeyValueStore`].
///
/// # Examples
///
/// ```
/// use smartclock_lib::storage::{KeyValueStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.set("greeting", "hello").unwrap();
/// assert_eq!(store.get("greeting").unwrap().as_deref(), Some("hello"));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
