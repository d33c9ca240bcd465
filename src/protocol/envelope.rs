// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire envelopes exchanged with the clock.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch, as used in every envelope.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Credentials attached to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAuth {
    /// Session token issued by the clock.
    pub token: String,
    /// Identifier of the device the token was issued for.
    pub device_id: String,
}

/// A command published to the command topic.
///
/// ```json
/// { "command": "set_alarm", "data": {...}, "auth": {...}, "timestamp": 1700000000000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command name.
    pub command: String,
    /// Command arguments.
    pub data: Value,
    /// Credentials, present when a valid token exists.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auth: Option<CommandAuth>,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

impl CommandEnvelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(command: impl Into<String>, data: Value, auth: Option<CommandAuth>) -> Self {
        Self {
            command: command.into(),
            data,
            auth,
            timestamp: now_millis(),
        }
    }
}

/// Online/offline presence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// The client is connected.
    Online,
    /// The client left or lost its session.
    Offline,
}

/// Retained presence announcement on the status topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEnvelope {
    /// Presence value.
    pub status: PresenceStatus,
    /// Announced device.
    pub device_id: String,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

impl PresenceEnvelope {
    /// Creates a presence announcement stamped with the current time.
    #[must_use]
    pub fn new(status: PresenceStatus, device_id: impl Into<String>) -> Self {
        Self {
            status,
            device_id: device_id.into(),
            timestamp: now_millis(),
        }
    }

    /// Encodes the announcement for the wire.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Authentication request published to the auth topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Always `auth_request`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Device being authenticated against.
    pub device_id: String,
    /// The device password.
    pub password: String,
    /// Identifier of this client session.
    pub client_id: String,
    /// Correlation id; the clock answers on `auth/response/<requestId>`.
    pub request_id: String,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

impl AuthRequest {
    /// Creates an authentication request stamped with the current time.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        password: impl Into<String>,
        client_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: "auth_request".to_string(),
            device_id: device_id.into(),
            password: password.into(),
            client_id: client_id.into(),
            request_id: request_id.into(),
            timestamp: now_millis(),
        }
    }
}

/// Authentication response received on the correlated response topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Whether the password was accepted.
    pub success: bool,
    /// Issued token on success.
    #[serde(default)]
    pub token: Option<String>,
    /// Token lifetime in milliseconds from now.
    #[serde(default)]
    pub expiry: Option<i64>,
    /// Human-readable reason.
    #[serde(default)]
    pub message: Option<String>,
}
