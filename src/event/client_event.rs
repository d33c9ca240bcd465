// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client lifecycle event types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::client::ConnectionState;
use crate::protocol::Payload;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The caller asked for it.
    Requested,
    /// The transport closed the session.
    ConnectionLost,
    /// The health check found the session silent for too long.
    Stale,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Stale => write!(f, "session stale"),
        }
    }
}

/// Events emitted by a [`ClockClient`](crate::ClockClient).
///
/// Listeners registered with
/// [`ClockClient::on_event`](crate::ClockClient::on_event) and receivers
/// from [`ClockClient::subscribe_events`](crate::ClockClient::subscribe_events)
/// see the same sequence.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use smartclock_lib::event::ClientEvent;
///
/// let event = ClientEvent::ReconnectAttempt {
///     attempt: 1,
///     delay: Duration::from_secs(2),
/// };
/// assert!(event.is_connection());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A session was established.
    Connected {
        /// The active device.
        device_id: String,
    },

    /// The session ended.
    Disconnected {
        /// Why it ended.
        reason: DisconnectReason,
    },

    /// A non-fatal error happened while the client was running unattended.
    Error {
        /// Human readable description.
        message: String,
    },

    /// A reconnection attempt is scheduled.
    ReconnectAttempt {
        /// 1-based attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },

    /// Automatic reconnection gave up.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The transport reported the network unreachable.
    Offline,

    /// An inbound message was received.
    MessageReceived {
        /// Topic the message arrived on.
        topic: String,
        /// Decoded payload.
        payload: Payload,
    },

    /// A command or message was handed to the transport.
    PublishCompleted {
        /// Destination topic.
        topic: String,
    },

    /// A device was seen on the bus.
    DeviceObserved {
        /// The device identifier.
        device_id: String,
        /// Whether this is the first message from that device.
        is_new: bool,
    },

    /// The active device changed.
    DeviceSwitched {
        /// Previously active device.
        previous: Option<String>,
        /// Newly active device.
        current: String,
    },

    /// Authentication succeeded and a token was stored.
    AuthSucceeded {
        /// The authenticated device.
        device_id: String,
        /// Token expiry.
        expires_at: DateTime<Utc>,
    },

    /// Authentication was rejected or timed out; the stored token is gone.
    AuthFailed {
        /// The device.
        device_id: String,
        /// Reason reported by the device or the client.
        reason: String,
    },

    /// The connection state changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
}

impl ClientEvent {
    /// Returns `true` for events about the session itself.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connected { .. }
                | Self::Disconnected { .. }
                | Self::ReconnectAttempt { .. }
                | Self::ReconnectExhausted { .. }
                | Self::Offline
                | Self::StateChanged { .. }
        )
    }

    /// Returns `true` for authentication outcomes.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthSucceeded { .. } | Self::AuthFailed { .. })
    }

    /// Creates an error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
