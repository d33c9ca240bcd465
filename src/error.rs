// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `SmartClock` library.
//!
//! This module provides the error hierarchy for the client: value
//! validation, transport communication, authentication and storage.
//!
//! Only failures of an explicit call are returned as errors. Failures that
//! happen while the client runs unattended (a dropped session, a failed
//! reconnect attempt) are reported as [`ClientEvent`](crate::event::ClientEvent)s.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred during value validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Error reported by the transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A payload could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The client is missing required configuration (usually no active device).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No transport was supplied to the client.
    #[error("no transport available")]
    TransportUnavailable,

    /// The operation requires an established session.
    #[error("client is not connected")]
    NotConnected,

    /// Another connection attempt is already running.
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    /// Authentication is mandated but no valid token is stored.
    #[error("authentication required for device {device_id}")]
    AuthenticationRequired {
        /// The device that needs a token.
        device_id: String,
    },

    /// The device rejected the authentication request or answered with garbage.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A round-trip exceeded its deadline.
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline in milliseconds.
        after_ms: u64,
    },

    /// The transport failed to publish a message.
    #[error("failed to publish to {topic}: {source}")]
    Publish {
        /// The destination topic.
        topic: String,
        /// The transport failure.
        #[source]
        source: TransportError,
    },

    /// The transport failed to subscribe to a topic.
    #[error("failed to subscribe to {topic}: {source}")]
    Subscribe {
        /// The topic filter.
        topic: String,
        /// The transport failure.
        #[source]
        source: TransportError,
    },
}

impl Error {
    /// Creates a timeout error from a duration.
    #[must_use]
    pub(crate) fn timeout(operation: &'static str, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation,
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A device identifier was empty or whitespace only.
    #[error("device identifier must not be empty")]
    EmptyDeviceId,

    /// An authentication password was empty.
    #[error("password must not be empty")]
    EmptyPassword,

    /// A timezone name was empty.
    #[error("timezone must not be empty")]
    EmptyTimezone,

    /// A numeric value is outside the allowed range.
    #[error("{field} value {actual} is out of range [{min}, {max}]")]
    OutOfRange {
        /// The field being validated.
        field: &'static str,
        /// Minimum allowed value.
        min: i64,
        /// Maximum allowed value.
        max: i64,
        /// The actual value that was provided.
        actual: i64,
    },

    /// An alarm label exceeds the length the device can display.
    #[error("label is {actual} characters long, maximum is {max}")]
    LabelTooLong {
        /// Maximum allowed length.
        max: usize,
        /// The provided length.
        actual: usize,
    },
}

/// Errors related to the pub/sub or request/response transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// HTTP request failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The session has been closed.
    #[error("session closed")]
    Closed,

    /// The remote end refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Errors raised by a [`KeyValueStore`](crate::storage::KeyValueStore).
///
/// These never cross the public client API; the token store logs them and
/// falls back to the no-token state.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store cannot be used.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The backing store is full.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized.
    #[error("storage format error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
