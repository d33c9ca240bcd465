// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JSON file backed key-value store.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::KeyValueStore;
use crate::error::StorageError;

/// A [`KeyValueStore`] persisted as one JSON object in a file.
///
/// The file is read once, on first access, and later reads are answered
/// from memory. Every write rewrites the whole file through a temporary
/// sibling, so a crash never leaves a half-written store behind. A missing
/// file reads as an empty store.
///
/// Writes use blocking `std::fs` calls on the caller's thread. They are
/// small and rare (one per authentication or logout), but callers with
/// strict latency needs should wrap the store in their own backend.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Loaded lazily; also serializes write cycles on the file.
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl JsonFileStore {
    /// Creates a store backed by the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// The cached map, reading the file on first use. A failed read is not
    /// cached.
    fn loaded<'a>(
        &self,
        cache: &'a mut Option<BTreeMap<String, String>>,
    ) -> Result<&'a BTreeMap<String, String>, StorageError> {
        if cache.is_none() {
            *cache = Some(self.read_map()?);
        }
        Ok(cache.get_or_insert_default())
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|e| match e.kind() {
            ErrorKind::StorageFull => StorageError::QuotaExceeded,
            _ => StorageError::Io(e),
        })?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut cache = self.cache.lock();
        Ok(self.loaded(&mut cache)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut cache = self.cache.lock();
        let mut map = self.loaded(&mut cache)?.clone();
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)?;
        *cache = Some(map);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut cache = self.cache.lock();
        let mut map = self.loaded(&mut cache)?.clone();
        if map.remove(key).is_some() {
            self.write_map(&map)?;
            *cache = Some(map);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut cache = self.cache.lock();
        Ok(self.loaded(&mut cache)?.keys().cloned().collect())
    }
}
