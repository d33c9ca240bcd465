// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process pub/sub broker.
//!
//! [`MemoryTransport`] behaves like a tiny MQTT broker living inside the
//! process: published messages are recorded and routed to matching
//! subscriptions of the open session (including the publisher's own),
//! retained messages replay on subscribe, and the session can be dropped or
//! refused on demand. It backs the crate's tests and works for demos that
//! should run without a broker.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    Connection, ConnectOptions, EVENT_CHANNEL_CAPACITY, PublishOptions, QoS, Transport,
    TransportEvent, TransportSession,
};
use crate::error::TransportError;
use crate::protocol::{Payload, topic_matches};

/// A message recorded by the [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Destination topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// Options it was published with.
    pub options: PublishOptions,
    /// Sequence number of the session that published it.
    pub session: u64,
}

impl PublishedMessage {
    /// Decodes the payload.
    #[must_use]
    pub fn payload(&self) -> Payload {
        Payload::decode(&self.payload)
    }
}

/// Computes an automatic reply to a published message: `(topic, payload)`.
type Responder = Arc<dyn Fn(&PublishedMessage) -> Option<(String, Vec<u8>)> + Send + Sync>;

struct ActiveSession {
    id: u64,
    events: mpsc::Sender<TransportEvent>,
    subscriptions: Vec<String>,
}

impl ActiveSession {
    fn deliver(&self, topic: &str, payload: &[u8], retained: bool) -> bool {
        if !self
            .subscriptions
            .iter()
            .any(|filter| topic_matches(filter, topic))
        {
            return false;
        }

        let event = TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retained,
        };
        if self.events.try_send(event).is_err() {
            tracing::warn!(topic = %topic, "Memory transport event channel full, dropping message");
            return false;
        }
        true
    }

    fn notify(&self, event: TransportEvent) {
        let _ = self.events.try_send(event);
    }
}

#[derive(Default)]
struct BrokerState {
    refuse_connections: bool,
    failures_remaining: u32,
    fail_publishes: bool,
    connect_attempts: u32,
    publish_attempts: HashMap<String, usize>,
    session_seq: u64,
    active: Option<ActiveSession>,
    last_options: Option<ConnectOptions>,
    published: Vec<PublishedMessage>,
    retained: HashMap<String, Vec<u8>>,
    responders: Vec<(String, Responder)>,
}

impl BrokerState {
    fn active_for(&mut self, session: u64) -> Result<&mut ActiveSession, TransportError> {
        self.active
            .as_mut()
            .filter(|active| active.id == session)
            .ok_or(TransportError::Closed)
    }
}

#[derive(Default)]
struct Broker {
    state: Mutex<BrokerState>,
}

/// In-process [`Transport`].
///
/// Clones share the same broker, so a test can keep one handle while the
/// client owns another.
///
/// # Examples
///
/// ```
/// use smartclock_lib::ClockClient;
/// use smartclock_lib::transport::MemoryTransport;
///
/// # async fn example() -> smartclock_lib::Result<()> {
/// let broker = MemoryTransport::new();
/// let client = ClockClient::builder()
///     .transport(broker.clone())
///     .device("Kitchen Clock")
///     .build()?;
///
/// client.connect().await?;
/// client.snooze().await?;
/// assert_eq!(broker.published_to("smartclock/kitchen_clock/command").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Broker>,
}

impl MemoryTransport {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses (or accepts again) every connection attempt.
    pub fn refuse_connections(&self, refuse: bool) {
        self.broker.state.lock().refuse_connections = refuse;
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.broker.state.lock().failures_remaining = count;
    }

    /// Makes every publish fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.broker.state.lock().fail_publishes = fail;
    }

    /// Number of connection attempts seen, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.broker.state.lock().connect_attempts
    }

    /// Number of publish requests made to `topic`, refused ones included.
    #[must_use]
    pub fn publish_attempts(&self, topic: &str) -> usize {
        self.broker
            .state
            .lock()
            .publish_attempts
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Returns `true` while a session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.broker.state.lock().active.is_some()
    }

    /// Options of the most recent connection attempt.
    #[must_use]
    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.broker.state.lock().last_options.clone()
    }

    /// Topic filters of the open session.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.broker
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| active.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Every message published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.broker.state.lock().published.clone()
    }

    /// Messages published to one topic, oldest first.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.broker
            .state
            .lock()
            .published
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Forgets recorded messages.
    pub fn clear_published(&self) {
        self.broker.state.lock().published.clear();
    }

    /// Returns the retained payload of a topic.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.broker.state.lock().retained.get(topic).cloned()
    }

    /// Replies automatically to messages published on matching topics.
    ///
    /// The responder runs without the broker lock held; its reply is routed
    /// like any other publish.
    pub fn respond_to<F>(&self, filter: impl Into<String>, responder: F)
    where
        F: Fn(&PublishedMessage) -> Option<(String, Vec<u8>)> + Send + Sync + 'static,
    {
        self.broker
            .state
            .lock()
            .responders
            .push((filter.into(), Arc::new(responder)));
    }

    /// Delivers a message from "the bus" to the open session.
    ///
    /// Returns `true` if a subscription matched.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        let payload = payload.into();
        let state = self.broker.state.lock();
        state
            .active
            .as_ref()
            .is_some_and(|active| active.deliver(topic, &payload, false))
    }

    /// Sends an arbitrary notification to the open session.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(active) = &self.broker.state.lock().active {
            active.notify(event);
        }
    }

    /// Kills the open session as if the network dropped it.
    ///
    /// Delivers the session's last will, if any.
    pub fn drop_connection(&self) {
        self.terminate(&[TransportEvent::Close]);
    }

    /// Forgets the open session without telling the client, like a
    /// half-open link. The client only notices on its next request.
    ///
    /// Delivers the session's last will, if any.
    pub fn sever_connection(&self) {
        self.terminate(&[]);
    }

    /// Reports the network as unreachable and closes the session.
    pub fn go_offline(&self) {
        self.terminate(&[TransportEvent::Offline, TransportEvent::Close]);
    }

    fn terminate(&self, events: &[TransportEvent]) {
        let mut state = self.broker.state.lock();
        let Some(active) = state.active.take() else {
            return;
        };
        for event in events {
            active.notify(event.clone());
        }

        if let Some(will) = state.last_options.as_ref().and_then(|o| o.last_will.clone()) {
            if will.retain {
                state.retained.insert(will.topic.clone(), will.payload.clone());
            }
            state.published.push(PublishedMessage {
                topic: will.topic,
                payload: will.payload,
                options: PublishOptions {
                    qos: will.qos,
                    retain: will.retain,
                },
                session: active.id,
            });
        }
        tracing::debug!(session = active.id, "Memory transport dropped session");
    }

    fn route(&self, topic: &str, payload: &[u8]) {
        let state = self.broker.state.lock();
        if let Some(active) = &state.active {
            active.deliver(topic, payload, false);
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.broker.state.lock();
        f.debug_struct("MemoryTransport")
            .field("connected", &state.active.is_some())
            .field("connect_attempts", &state.connect_attempts)
            .field("published", &state.published.len())
            .finish()
    }
}

/// A session opened on a [`MemoryTransport`].
pub struct MemorySession {
    id: u64,
    transport: MemoryTransport,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession").field("id", &self.id).finish()
    }
}

impl Transport for MemoryTransport {
    type Session = MemorySession;

    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Connection<MemorySession>, TransportError> {
        let mut state = self.broker.state.lock();
        state.connect_attempts += 1;
        state.last_options = Some(options);

        if state.refuse_connections {
            return Err(TransportError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(TransportError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        state.session_seq += 1;
        let id = state.session_seq;

        // A newer session replaces the previous one, as a broker does for
        // a reused client id.
        if let Some(previous) = state.active.replace(ActiveSession {
            id,
            events: events_tx,
            subscriptions: Vec::new(),
        }) {
            previous.notify(TransportEvent::Close);
        }

        Ok(Connection {
            session: MemorySession {
                id,
                transport: self.clone(),
            },
            events: events_rx,
        })
    }
}

impl TransportSession for MemorySession {
    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        let mut state = self.transport.broker.state.lock();
        let retained: Vec<(String, Vec<u8>)> = state
            .retained
            .iter()
            .filter(|(retained_topic, _)| topic_matches(topic, retained_topic))
            .map(|(t, p)| (t.clone(), p.clone()))
            .collect();

        let active = state.active_for(self.id)?;
        if !active.subscriptions.iter().any(|filter| filter == topic) {
            active.subscriptions.push(topic.to_string());
        }
        active.notify(TransportEvent::Activity);
        for (retained_topic, payload) in retained {
            active.deliver(&retained_topic, &payload, true);
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.transport.broker.state.lock();
        let active = state.active_for(self.id)?;
        active.subscriptions.retain(|filter| filter != topic);
        active.notify(TransportEvent::Activity);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload,
            options,
            session: self.id,
        };

        let responders: Vec<Responder> = {
            let mut state = self.transport.broker.state.lock();
            *state.publish_attempts.entry(message.topic.clone()).or_default() += 1;
            if state.fail_publishes {
                return Err(TransportError::Rejected("publish refused".to_string()));
            }

            let active = state.active_for(self.id)?;
            if options.qos != QoS::AtMostOnce {
                active.notify(TransportEvent::Activity);
            }
            active.deliver(&message.topic, &message.payload, false);

            if options.retain {
                if message.payload.is_empty() {
                    state.retained.remove(topic);
                } else {
                    state
                        .retained
                        .insert(topic.to_string(), message.payload.clone());
                }
            }
            state.published.push(message.clone());

            state
                .responders
                .iter()
                .filter(|(filter, _)| topic_matches(filter, topic))
                .map(|(_, responder)| Arc::clone(responder))
                .collect()
        };

        for responder in responders {
            if let Some((reply_topic, reply)) = responder(&message) {
                self.transport.route(&reply_topic, &reply);
            }
        }
        Ok(())
    }

    async fn end(&self) -> Result<(), TransportError> {
        let mut state = self.transport.broker.state.lock();
        if state.active.as_ref().is_some_and(|active| active.id == self.id)
            && let Some(active) = state.active.take()
        {
            active.notify(TransportEvent::End);
        }
        Ok(())
    }
}
