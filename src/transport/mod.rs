// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport abstraction for the pub/sub session.
//!
//! The client does not talk to a broker directly. It is handed a
//! [`Transport`] at construction time and asks it for a session on every
//! (re)connect. Implementations:
//!
//! - [`MqttTransport`]: MQTT over TCP via `rumqttc` (feature `mqtt`)
//! - [`MemoryTransport`]: an in-process broker for tests and demos
//!
//! [`HttpFallback`] (feature `http`) is not a session transport; it delivers
//! commands over plain HTTP while the pub/sub session is down.

mod memory;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "mqtt")]
mod mqtt;

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::TransportError;

#[cfg(feature = "http")]
pub use http::HttpFallback;
pub use memory::{MemorySession, MemoryTransport, PublishedMessage};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttSession, MqttTransport};

/// Capacity of the transport event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Delivery assurance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    #[default]
    AtLeastOnce,
    /// Exactly-once handshake where the broker supports it.
    ExactlyOnce,
}

/// Options for a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    /// Delivery assurance level.
    pub qos: QoS,
    /// Whether the broker keeps the message for late subscribers.
    pub retain: bool,
}

impl PublishOptions {
    /// Options for a retained at-least-once message.
    #[must_use]
    pub const fn retained() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }

    /// Sets the QoS level.
    #[must_use]
    pub const fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
}

/// Message the broker publishes if the session ends uncleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    /// Destination topic.
    pub topic: String,
    /// Encoded payload.
    pub payload: Vec<u8>,
    /// Delivery assurance level.
    pub qos: QoS,
    /// Whether the broker retains the will.
    pub retain: bool,
}

/// Parameters for opening a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Broker URL (e.g. `mqtt://192.168.1.50:1883`).
    pub url: String,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Whether the broker should discard previous session state.
    pub clean_session: bool,
    /// Optional (username, password).
    pub credentials: Option<(String, String)>,
    /// Optional last-will message.
    pub last_will: Option<LastWill>,
}

/// Notifications emitted by an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An inbound message.
    Message {
        /// Topic the message arrived on.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
        /// Whether this is a retained message replayed by the broker.
        retained: bool,
    },
    /// Protocol traffic that proves the session is alive (acks, pings).
    Activity,
    /// A non-fatal transport error.
    Error(String),
    /// The transport is re-establishing the session on its own.
    Reconnect,
    /// The network became unreachable.
    Offline,
    /// The session closed without the client asking for it.
    Close,
    /// The session ended after a client-initiated disconnect.
    End,
}

/// An open session plus its event stream.
#[derive(Debug)]
pub struct Connection<S> {
    /// Handle used for subscribe/publish.
    pub session: S,
    /// Stream of session notifications; closes when the session is gone.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for pub/sub sessions, injected into the client.
pub trait Transport: Send + Sync + 'static {
    /// The session type produced by [`connect`](Self::connect).
    type Session: TransportSession;

    /// Opens a session. Resolves once the broker acknowledged the connection.
    ///
    /// # Errors
    ///
    /// Returns error if the broker cannot be reached or refuses the session.
    fn connect(
        &self,
        options: ConnectOptions,
    ) -> impl Future<Output = Result<Connection<Self::Session>, TransportError>> + Send;
}

/// An open pub/sub session.
pub trait TransportSession: Send + Sync + 'static {
    /// Subscribes to a topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be delivered.
    fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be delivered.
    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// Returns error if the message cannot be delivered.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Ends the session cleanly; the last will is not delivered.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be delivered.
    fn end(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Parses a broker URL into host and port.
///
/// Accepts `mqtt://`, `tcp://` or no scheme; the port defaults to 1883.
///
/// # Errors
///
/// Returns `TransportError::InvalidAddress` for an empty host or a bad port.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), TransportError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| TransportError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    if host.is_empty() {
        return Err(TransportError::InvalidAddress(
            "MQTT broker host is required".to_string(),
        ));
    }

    Ok((host, port))
}
