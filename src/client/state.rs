// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection state and bookkeeping types.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::transport::QoS;

/// State of the client's pub/sub session.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting ...
///                                   |
///                                   +-> Offline -> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// A session is being opened.
    Connecting,
    /// The session is up.
    Connected,
    /// Waiting before the next automatic reconnection attempt.
    Reconnecting,
    /// The transport reported the network unreachable.
    Offline,
}

impl ConnectionState {
    /// Returns `true` only in [`Connected`](Self::Connected).
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// An acknowledged subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// Topic filter.
    pub topic: String,
    /// Requested QoS.
    pub qos: QoS,
    /// When the subscription was acknowledged.
    pub subscribed_at: DateTime<Utc>,
    /// Device that was active at the time.
    pub device_id: Option<String>,
}

/// What [`ClockClient::publish`](crate::ClockClient::publish) did with a
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport.
    Sent,
    /// Stored in the offline queue until the next connection.
    Queued,
}

/// Counters kept by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Messages handed to a transport (commands included).
    pub messages_sent: u64,
    /// Commands sent.
    pub commands_sent: u64,
    /// Inbound messages.
    pub messages_received: u64,
    /// Messages put in the offline queue.
    pub messages_queued: u64,
    /// Queued messages lost to eviction or failed delivery.
    pub messages_dropped: u64,
    /// Time of the last successful command.
    pub last_command_at: Option<DateTime<Utc>>,
}
