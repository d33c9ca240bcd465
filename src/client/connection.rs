// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session lifecycle: connect, disconnect, device switching and the
//! supervisor task.
//!
//! Every established session gets one supervisor task. It pumps transport
//! events, runs the health check and, when the session is lost, drives the
//! reconnect backoff and keeps supervising the replacement session. Paths
//! that supersede it (`disconnect`, an explicit `connect` during backoff)
//! abort it before taking the transition lock.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::{ActiveDevice, ClockClient, ConnectionState, Shared, SubscriptionRecord, millis};
use crate::error::{Error, Result, TransportError};
use crate::event::{ClientEvent, DisconnectReason, InboundMessage};
use crate::protocol::{AuthResponse, PresenceEnvelope, PresenceStatus, TopicSet};
use crate::transport::{
    ConnectOptions, Connection, LastWill, PublishOptions, QoS, Transport, TransportEvent,
    TransportSession,
};

type Events = mpsc::Receiver<TransportEvent>;

/// Undoes the partial effects of an abandoned bring-up, whether it failed
/// or its future was dropped.
struct BringUpGuard<'a, T: Transport> {
    shared: &'a Shared<T>,
    armed: bool,
}

impl<T: Transport> Drop for BringUpGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.subscriptions.write().clear();
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }
}

impl<T: Transport> ClockClient<T> {
    /// Opens a session for the active device.
    ///
    /// On success the device's topics are subscribed, the offline queue is
    /// flushed and a retained `online` presence is published. The broker
    /// publishes a retained `offline` presence on the client's behalf if the
    /// session later dies. Does nothing if already connected.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` without an active device
    /// - `Error::TransportUnavailable` without a transport
    /// - `Error::ConnectInProgress` while another attempt is running
    /// - `Error::Timeout` if the broker does not answer in time
    /// - `Error::Transport` if the broker refuses the session or it closes
    ///   before the queue flush completes; undelivered entries stay queued
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        shared.require_device()?;
        if shared.transport.is_none() {
            return Err(Error::TransportUnavailable);
        }

        let Ok(_guard) = shared.transition.try_lock() else {
            return Err(Error::ConnectInProgress);
        };

        if shared.current_session().is_some() {
            tracing::debug!("Already connected");
            return Ok(());
        }

        // A pending backoff is superseded by this attempt
        shared.abort_supervisor();
        shared.attempts.store(0, Ordering::Relaxed);

        let events = shared.establish().await?;
        let handle = tokio::spawn(Arc::clone(shared).supervise(events));
        *shared.supervisor.lock() = Some(handle);
        Ok(())
    }

    /// Ends the session.
    ///
    /// Always permitted and idempotent. Stops the supervisor (health check
    /// and pending reconnects included), removes subscriptions, publishes a
    /// final `offline` presence and closes the session cleanly.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.abort_supervisor();
        let _guard = shared.transition.lock().await;

        let session = shared.session.write().take();
        let records = std::mem::take(&mut *shared.subscriptions.write());
        shared.pending_auth.lock().clear();
        shared.attempts.store(0, Ordering::Relaxed);

        let Some(session) = session else {
            shared.set_state(ConnectionState::Disconnected);
            return;
        };

        for record in &records {
            if let Err(e) = session.unsubscribe(&record.topic).await {
                tracing::debug!(topic = %record.topic, error = %e, "Unsubscribe failed");
            }
        }
        if let Some(device) = shared.active_device() {
            shared
                .publish_presence(&session, &device, PresenceStatus::Offline)
                .await;
        }
        if let Err(e) = session.end().await {
            tracing::debug!(error = %e, "Session did not end cleanly");
        }

        shared.set_state(ConnectionState::Disconnected);
        tracing::info!(client_id = %shared.client_id, "Disconnected");
        shared.emit(ClientEvent::Disconnected {
            reason: DisconnectReason::Requested,
        });
    }

    /// Makes another device the active one.
    ///
    /// While connected, the previous device's subscriptions are replaced by
    /// the new device's and presence is announced for both. Selecting the
    /// active device again does nothing.
    ///
    /// The last-will registered with the broker keeps naming the device
    /// that was active when the session opened, until the next reconnect.
    ///
    /// # Errors
    ///
    /// Returns `Error::Value` for an empty identifier.
    pub async fn set_device(&self, device_id: &str) -> Result<TopicSet> {
        let shared = &self.shared;
        let id = device_id.trim();
        let topics = TopicSet::derive(&shared.config.topic_prefix, id)?;

        let _guard = shared.transition.lock().await;
        let previous = shared.active_device();
        if previous.as_ref().is_some_and(|d| d.id == id) {
            return Ok(topics);
        }

        let next = ActiveDevice {
            id: id.to_string(),
            topics: topics.clone(),
        };
        let session = shared.current_session();

        if let Some(session) = &session {
            let records = std::mem::take(&mut *shared.subscriptions.write());
            for record in &records {
                if let Err(e) = session.unsubscribe(&record.topic).await {
                    tracing::debug!(topic = %record.topic, error = %e, "Unsubscribe failed");
                }
            }
            if let Some(previous) = &previous {
                shared
                    .publish_presence(session, previous, PresenceStatus::Offline)
                    .await;
            }
        }

        *shared.device.write() = Some(next.clone());

        if let Some(session) = &session {
            shared.subscribe_all(session, &next).await;
            shared
                .publish_presence(session, &next, PresenceStatus::Online)
                .await;
        }

        let previous = previous.map(|d| d.id);
        tracing::info!(previous = ?previous, device = %next.id, "Active device switched");
        shared.emit(ClientEvent::DeviceSwitched {
            previous,
            current: next.id,
        });
        Ok(topics)
    }

    /// Activates the device that was last authenticated, if any.
    ///
    /// # Errors
    ///
    /// Returns `Error::Value` if the stored identifier is unusable.
    pub async fn restore_last_device(&self) -> Result<Option<TopicSet>> {
        match self.shared.tokens.last_used_device() {
            Some(device_id) => self.set_device(&device_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Subscribes to an additional topic filter.
    ///
    /// The filter is kept across reconnects and device switches. While
    /// disconnected it is only remembered.
    ///
    /// # Errors
    ///
    /// Returns `Error::Subscribe` if the transport rejects the request.
    pub async fn subscribe_topic(&self, topic: &str, qos: QoS) -> Result<()> {
        {
            let mut extras = self.shared.extra_topics.write();
            extras.retain(|(t, _)| t != topic);
            extras.push((topic.to_string(), qos));
        }

        let Some(session) = self.shared.current_session() else {
            return Ok(());
        };
        session
            .subscribe(topic, qos)
            .await
            .map_err(|source| Error::Subscribe {
                topic: topic.to_string(),
                source,
            })?;

        self.shared.touch();
        tracing::debug!(topic = %topic, "Subscribed");
        self.shared
            .record_subscription(topic.to_string(), qos, self.active_device());
        Ok(())
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the transport rejects the request.
    pub async fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        self.shared.extra_topics.write().retain(|(t, _)| t != topic);
        let removed = {
            let mut records = self.shared.subscriptions.write();
            let before = records.len();
            records.retain(|r| r.topic != topic);
            records.len() != before
        };

        if let Some(session) = self.shared.current_session()
            && removed
        {
            session.unsubscribe(topic).await?;
            self.shared.touch();
            tracing::debug!(topic = %topic, "Unsubscribed");
        }
        Ok(())
    }
}

impl<T: Transport> Shared<T> {
    /// Opens a session and brings it into service.
    ///
    /// The caller holds the transition lock.
    async fn establish(&self) -> Result<Events> {
        let transport = self.transport.as_ref().ok_or(Error::TransportUnavailable)?;
        let device = self.require_device()?;

        self.set_state(ConnectionState::Connecting);
        let options = self.connect_options(&device);
        let deadline = self.config.connect_timeout;

        let connection = match tokio::time::timeout(deadline, transport.connect(options)).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(Error::timeout("connect", deadline));
            }
        };

        let Connection {
            session,
            mut events,
        } = connection;
        let session = Arc::new(session);
        self.touch();
        let mut rollback = BringUpGuard {
            shared: self,
            armed: true,
        };

        // Events are drained during bring-up; a full event channel stalls
        // the transport and with it every pending publish.
        {
            let bring_up = self.bring_up(&session, &device);
            tokio::pin!(bring_up);
            loop {
                tokio::select! {
                    outcome = &mut bring_up => {
                        outcome?;
                        break;
                    }
                    event = events.recv() => {
                        let lost = match event {
                            Some(event) => self.on_transport_event(event).is_some(),
                            None => true,
                        };
                        if lost {
                            tracing::warn!(device = %device.id, "Session lost while coming up");
                            return Err(TransportError::Closed.into());
                        }
                    }
                }
            }
        }

        rollback.armed = false;
        *self.session.write() = Some(session);
        self.attempts.store(0, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);

        tracing::info!(
            device = %device.id,
            client_id = %self.client_id,
            url = %self.config.broker_url,
            "Connected"
        );
        self.emit(ClientEvent::Connected {
            device_id: device.id,
        });
        Ok(events)
    }

    /// Subscribes, flushes the offline queue and announces presence on a
    /// session that is not yet visible to callers.
    async fn bring_up(
        &self,
        session: &T::Session,
        device: &ActiveDevice,
    ) -> std::result::Result<(), TransportError> {
        self.subscribe_all(session, device).await;
        self.flush_queue(session).await?;
        self.publish_presence(session, device, PresenceStatus::Online)
            .await;
        Ok(())
    }

    fn connect_options(&self, device: &ActiveDevice) -> ConnectOptions {
        ConnectOptions {
            url: self.config.broker_url.clone(),
            client_id: self.client_id.clone(),
            keep_alive: self.config.keep_alive,
            clean_session: self.config.clean_session,
            credentials: self.config.credentials.clone(),
            last_will: Some(LastWill {
                topic: device.topics.status().to_string(),
                payload: PresenceEnvelope::new(PresenceStatus::Offline, &device.id).to_bytes(),
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
        }
    }

    /// Subscribes the device's channels plus any extra topics.
    async fn subscribe_all(&self, session: &T::Session, device: &ActiveDevice) {
        let mut topics: Vec<(String, QoS)> = device
            .topics
            .subscriptions()
            .iter()
            .map(|topic| ((*topic).to_string(), QoS::AtLeastOnce))
            .collect();
        let extras = self.extra_topics.read().clone();
        for extra in extras {
            if !topics.iter().any(|(topic, _)| *topic == extra.0) {
                topics.push(extra);
            }
        }

        for (topic, qos) in topics {
            match session.subscribe(&topic, qos).await {
                Ok(()) => {
                    self.touch();
                    tracing::debug!(topic = %topic, "Subscribed");
                    self.record_subscription(topic, qos, Some(device.id.clone()));
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Subscribe failed");
                    self.emit(ClientEvent::error(format!(
                        "failed to subscribe to {topic}: {e}"
                    )));
                }
            }
        }
    }

    fn record_subscription(&self, topic: String, qos: QoS, device_id: Option<String>) {
        let mut records = self.subscriptions.write();
        records.retain(|r| r.topic != topic);
        records.push(SubscriptionRecord {
            topic,
            qos,
            subscribed_at: Utc::now(),
            device_id,
        });
    }

    async fn publish_presence(
        &self,
        session: &T::Session,
        device: &ActiveDevice,
        status: PresenceStatus,
    ) {
        let payload = PresenceEnvelope::new(status, &device.id).to_bytes();
        match session
            .publish(device.topics.status(), payload, PublishOptions::retained())
            .await
        {
            Ok(()) => self.touch(),
            Err(e) => tracing::debug!(device = %device.id, error = %e, "Presence not published"),
        }
    }

    /// Body of the supervisor task.
    async fn supervise(self: Arc<Self>, mut events: Events) {
        loop {
            let reason = self.pump(&mut events).await;
            self.handle_loss(reason).await;

            if !self.reconnection.enabled {
                tracing::info!("Automatic reconnection disabled");
                return;
            }

            match self.reconnect().await {
                Some(next) => events = next,
                None => return,
            }
        }
    }

    /// Processes transport events until the session is lost.
    async fn pump(&self, events: &mut Events) -> DisconnectReason {
        let configured = self.config.health_check_interval;
        let health_enabled = !configured.is_zero();
        let period = configured.max(Duration::from_millis(1));

        let mut health = interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return DisconnectReason::ConnectionLost;
                    };
                    if let Some(reason) = self.on_transport_event(event) {
                        return reason;
                    }
                }
                _ = health.tick(), if health_enabled => {
                    let silence = self.silence();
                    if silence > period * 2 {
                        tracing::warn!(
                            silence_ms = millis(silence),
                            "No activity on the session, treating it as stale"
                        );
                        return DisconnectReason::Stale;
                    }
                    tracing::trace!(silence_ms = millis(silence), "Health check passed");
                }
            }
        }
    }

    fn on_transport_event(&self, event: TransportEvent) -> Option<DisconnectReason> {
        match event {
            TransportEvent::Message {
                topic,
                payload,
                retained,
            } => {
                self.mark_alive();
                self.handle_message(InboundMessage::decode(topic, &payload, retained));
            }
            TransportEvent::Activity => self.mark_alive(),
            TransportEvent::Error(message) => {
                tracing::warn!(error = %message, "Transport error");
                self.emit(ClientEvent::Error { message });
            }
            TransportEvent::Reconnect => tracing::debug!("Transport is re-establishing the session"),
            TransportEvent::Offline => {
                tracing::warn!("Network unreachable");
                self.set_state(ConnectionState::Offline);
                self.emit(ClientEvent::Offline);
            }
            TransportEvent::Close | TransportEvent::End => {
                return Some(DisconnectReason::ConnectionLost);
            }
        }
        None
    }

    fn mark_alive(&self) {
        self.touch();
        if *self.state.borrow() == ConnectionState::Offline {
            self.set_state(ConnectionState::Connected);
        }
    }

    fn handle_message(&self, message: InboundMessage) {
        self.stats.lock().messages_received += 1;

        let waiter = self.pending_auth.lock().remove(&message.topic);
        if let Some(waiter) = waiter {
            let response = message
                .payload
                .parse::<AuthResponse>()
                .unwrap_or_else(|| AuthResponse {
                    success: false,
                    token: None,
                    expiry: None,
                    message: Some("malformed authentication response".to_string()),
                });
            let _ = waiter.send(response);
            return;
        }

        tracing::debug!(topic = %message.topic, retained = message.retained, "Message received");

        if let Some((device_id, is_new)) = self.registry.observe(&message.payload) {
            self.emit(ClientEvent::DeviceObserved { device_id, is_new });
        }
        self.emit(ClientEvent::MessageReceived {
            topic: message.topic.clone(),
            payload: message.payload.clone(),
        });
        self.router.dispatch(&message);
    }

    /// Tears down the lost session.
    async fn handle_loss(&self, reason: DisconnectReason) {
        let _guard = self.transition.lock().await;

        let session = self.session.write().take();
        self.subscriptions.write().clear();
        self.pending_auth.lock().clear();

        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(reason = %reason, "Connection lost");
        self.emit(ClientEvent::Disconnected { reason });

        let Some(session) = session else {
            return;
        };
        if reason == DisconnectReason::Stale
            && let Err(e) = session.end().await
        {
            tracing::debug!(error = %e, "Stale session did not end cleanly");
        }
        if let Some(device) = self.active_device() {
            self.publish_presence(&session, &device, PresenceStatus::Offline)
                .await;
        }
    }

    /// Backoff loop. Returns the events of the new session, or `None` once
    /// the policy gives up.
    async fn reconnect(&self) -> Option<Events> {
        loop {
            let failed = self.attempts.load(Ordering::Relaxed);
            if !self.reconnection.should_retry(failed) {
                tracing::warn!(attempts = failed, "Giving up reconnecting");
                self.set_state(ConnectionState::Disconnected);
                self.emit(ClientEvent::ReconnectExhausted { attempts: failed });
                return None;
            }

            let delay = self.reconnection.delay_for_attempt(failed);
            let attempt = failed + 1;
            self.attempts.store(attempt, Ordering::Relaxed);

            self.set_state(ConnectionState::Reconnecting);
            tracing::info!(attempt, delay_ms = millis(delay), "Scheduling reconnection");
            self.emit(ClientEvent::ReconnectAttempt { attempt, delay });

            tokio::time::sleep(delay).await;

            let _guard = self.transition.lock().await;
            match self.establish().await {
                Ok(events) => return Some(events),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
                    self.emit(ClientEvent::error(e.to_string()));
                }
            }
        }
    }
}
