// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent per-device session tokens.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::KeyValueStore;

/// Storage key holding the JSON map of tokens by device identifier.
pub const TOKENS_KEY: &str = "smartclock_tokens";

/// Storage key holding the last device a token was saved for.
pub const LAST_DEVICE_KEY: &str = "smartclock_last_device";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    /// Epoch milliseconds.
    expiry: i64,
}

/// An authentication token issued by a clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Device the token belongs to.
    pub device_id: String,
    /// Opaque token value.
    pub token: String,
    /// Instant the token stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    /// Returns `true` if the token is still valid at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Returns `true` if the token is valid right now.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Persists session tokens keyed by device identifier.
///
/// All tokens live in one JSON map in the backing [`KeyValueStore`]. Each
/// operation is a read-modify-write of that map and runs under an internal
/// mutex, so concurrent saves for different devices never lose updates.
///
/// Storage failures are logged and treated as "no token"; nothing here
/// returns an error.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use chrono::{Duration, Utc};
/// use smartclock_lib::auth::TokenStore;
/// use smartclock_lib::storage::MemoryStore;
///
/// let store = TokenStore::new(Arc::new(MemoryStore::new()));
/// store.save("desk", "tok", Utc::now() + Duration::hours(1));
/// assert_eq!(store.load("desk").unwrap().token, "tok");
/// assert_eq!(store.last_used_device().as_deref(), Some("desk"));
/// ```
pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl TokenStore {
    /// Creates a token store over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// Loads the token for a device.
    ///
    /// An expired token is removed from storage and reported as absent.
    #[must_use]
    pub fn load(&self, device_id: &str) -> Option<SessionToken> {
        self.load_at(device_id, Utc::now())
    }

    /// Loads the token for a device, judging expiry against `now`.
    #[must_use]
    pub fn load_at(&self, device_id: &str, now: DateTime<Utc>) -> Option<SessionToken> {
        let _guard = self.lock.lock();
        let mut tokens = self.read_tokens();
        let stored = tokens.get(device_id)?.clone();

        let expires_at = DateTime::from_timestamp_millis(stored.expiry).unwrap_or_default();
        let token = SessionToken {
            device_id: device_id.to_string(),
            token: stored.token,
            expires_at,
        };

        if token.is_valid_at(now) {
            return Some(token);
        }

        tracing::debug!(device = %device_id, expired_at = %expires_at, "Purging expired token");
        tokens.remove(device_id);
        self.write_tokens(&tokens);
        None
    }

    /// Returns `true` if a valid token exists for the device.
    #[must_use]
    pub fn is_valid(&self, device_id: &str) -> bool {
        self.load(device_id).is_some()
    }

    /// Stores a token and remembers the device as last used.
    ///
    /// Returns `false` if the backend refused the write.
    pub fn save(&self, device_id: &str, token: &str, expires_at: DateTime<Utc>) -> bool {
        let _guard = self.lock.lock();
        let mut tokens = self.read_tokens();
        tokens.insert(
            device_id.to_string(),
            StoredToken {
                token: token.to_string(),
                expiry: expires_at.timestamp_millis(),
            },
        );

        let saved = self.write_tokens(&tokens);
        if let Err(e) = self.storage.set(LAST_DEVICE_KEY, device_id) {
            warn_storage("remember last device", &e);
        }
        saved
    }

    /// Removes the token of one device; other devices keep theirs.
    pub fn clear(&self, device_id: &str) {
        let _guard = self.lock.lock();
        let mut tokens = self.read_tokens();
        if tokens.remove(device_id).is_some() {
            self.write_tokens(&tokens);
            tracing::debug!(device = %device_id, "Cleared session token");
        }
    }

    /// Returns the device a token was last saved for.
    #[must_use]
    pub fn last_used_device(&self) -> Option<String> {
        match self.storage.get(LAST_DEVICE_KEY) {
            Ok(device) => device.filter(|id| !id.trim().is_empty()),
            Err(e) => {
                warn_storage("read last device", &e);
                None
            }
        }
    }

    /// Lists devices with a stored token, expired or not.
    #[must_use]
    pub fn devices(&self) -> Vec<String> {
        let _guard = self.lock.lock();
        self.read_tokens().into_keys().collect()
    }

    fn read_tokens(&self) -> BTreeMap<String, StoredToken> {
        let raw = match self.storage.get(TOKENS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn_storage("read tokens", &e);
                return BTreeMap::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn_storage("decode tokens", &StorageError::Json(e));
            BTreeMap::new()
        })
    }

    fn write_tokens(&self, tokens: &BTreeMap<String, StoredToken>) -> bool {
        let result = if tokens.is_empty() {
            self.storage.remove(TOKENS_KEY)
        } else {
            serde_json::to_string(tokens)
                .map_err(StorageError::from)
                .and_then(|raw| self.storage.set(TOKENS_KEY, &raw))
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn_storage("write tokens", &e);
                false
            }
        }
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

fn warn_storage(action: &str, error: &StorageError) {
    tracing::warn!(action, error = %error, "Token storage failed, continuing without it");
}
