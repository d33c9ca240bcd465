// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command dispatch, plain publishes and the offline queue flush.

use chrono::Utc;
use serde_json::{Value, json};

use super::{ActiveDevice, ClockClient, PublishOutcome, Shared};
use crate::command::{ClockCommand, Command};
use crate::error::{Error, Result, TransportError};
use crate::event::ClientEvent;
use crate::protocol::{CommandAuth, CommandEnvelope, Payload, now_millis};
use crate::queue::QueueEntry;
use crate::transport::{PublishOptions, Transport, TransportSession};
use crate::types::{Alarm, Brightness, Button};

impl<T: Transport> ClockClient<T> {
    /// Sends a command to the active device with default options
    /// (QoS 1, not retained).
    ///
    /// # Errors
    ///
    /// See [`send_command_with_options`](Self::send_command_with_options).
    pub async fn send_command(&self, name: &str, data: Value) -> Result<()> {
        self.send_command_with_options(name, data, PublishOptions::default())
            .await
    }

    /// Sends a typed command to the active device.
    ///
    /// # Errors
    ///
    /// See [`send_command_with_options`](Self::send_command_with_options).
    pub async fn send(&self, command: &impl Command) -> Result<()> {
        self.send_command(command.name(), command.data()).await
    }

    /// Sends a command to the active device.
    ///
    /// The stored token is attached whenever one is valid. Commands are
    /// never queued: while disconnected they go through the HTTP fallback
    /// if one is configured, otherwise they fail.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` without an active device
    /// - `Error::AuthenticationRequired` if tokens are mandatory and none is
    ///   valid (checked before connectivity)
    /// - `Error::NotConnected` without a session or fallback
    /// - `Error::Publish` if the transport rejects the message
    pub async fn send_command_with_options(
        &self,
        name: &str,
        data: Value,
        options: PublishOptions,
    ) -> Result<()> {
        let shared = &self.shared;
        let device = shared.require_device()?;

        let token = shared.tokens.load(&device.id);
        if shared.config.require_auth && token.is_none() {
            tracing::debug!(device = %device.id, command = %name, "Command refused, no valid token");
            return Err(Error::AuthenticationRequired {
                device_id: device.id,
            });
        }

        let auth = token.map(|t| CommandAuth {
            token: t.token,
            device_id: device.id.clone(),
        });
        let envelope = CommandEnvelope::new(name, data, auth);

        let Some(session) = shared.current_session() else {
            return shared.send_without_session(&device, &envelope).await;
        };

        let topic = device.topics.command();
        let payload = serde_json::to_vec(&envelope)?;
        session
            .publish(topic, payload, options)
            .await
            .map_err(|source| Error::Publish {
                topic: topic.to_string(),
                source,
            })?;

        shared.touch();
        shared.record_command();
        tracing::debug!(device = %device.id, command = %name, topic = %topic, "Command sent");
        shared.emit(ClientEvent::PublishCompleted {
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// Publishes an arbitrary message.
    ///
    /// While disconnected the message is stored in the offline queue and
    /// delivered after the next successful connection; a full queue drops
    /// its oldest entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Publish` if the transport rejects the message.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        options: PublishOptions,
    ) -> Result<PublishOutcome> {
        let shared = &self.shared;
        let bytes = payload.into().encode();

        let Some(session) = shared.current_session() else {
            let entry = QueueEntry::new(topic, bytes, options, self.active_device());
            let evicted = shared.queue.lock().enqueue(entry);

            let mut stats = shared.stats.lock();
            stats.messages_queued += 1;
            if evicted.is_some() {
                stats.messages_dropped += 1;
            }
            drop(stats);

            tracing::debug!(topic = %topic, "Not connected, message queued");
            return Ok(PublishOutcome::Queued);
        };

        session
            .publish(topic, bytes, options)
            .await
            .map_err(|source| Error::Publish {
                topic: topic.to_string(),
                source,
            })?;

        shared.touch();
        shared.stats.lock().messages_sent += 1;
        tracing::debug!(topic = %topic, "Published");
        shared.emit(ClientEvent::PublishCompleted {
            topic: topic.to_string(),
        });
        Ok(PublishOutcome::Sent)
    }

    /// Programs the alarm.
    ///
    /// # Errors
    ///
    /// Returns `Error::Value` for an hour above 23, a minute above 59 or a
    /// label longer than 32 characters, otherwise as
    /// [`send_command`](Self::send_command).
    pub async fn set_alarm(
        &self,
        hour: u8,
        minute: u8,
        sound: u8,
        enabled: bool,
        label: &str,
    ) -> Result<()> {
        let alarm = Alarm::new(hour, minute)?
            .with_sound(sound)
            .with_enabled(enabled)
            .with_label(label)?;
        self.send(&ClockCommand::SetAlarm(alarm)).await
    }

    /// Simulates a press of front-panel button `number` (1 to 4).
    ///
    /// # Errors
    ///
    /// Returns `Error::Value` for a number outside 1..=4.
    pub async fn press_button(&self, number: u8) -> Result<()> {
        let button = Button::new(number)?;
        self.send(&ClockCommand::PressButton(button)).await
    }

    /// Snoozes a ringing alarm.
    ///
    /// # Errors
    ///
    /// As [`send_command`](Self::send_command).
    pub async fn snooze(&self) -> Result<()> {
        self.send(&ClockCommand::Snooze).await
    }

    /// Silences a ringing alarm.
    ///
    /// # Errors
    ///
    /// As [`send_command`](Self::send_command).
    pub async fn stop_alarm(&self) -> Result<()> {
        self.send(&ClockCommand::StopAlarm).await
    }

    /// Reboots the clock.
    ///
    /// # Errors
    ///
    /// As [`send_command`](Self::send_command).
    pub async fn reset_device(&self) -> Result<()> {
        self.send(&ClockCommand::Reset).await
    }

    /// Sets display brightness; values are clamped to 0..=100.
    ///
    /// # Errors
    ///
    /// As [`send_command`](Self::send_command).
    pub async fn set_brightness(&self, level: i32) -> Result<()> {
        self.send(&ClockCommand::SetBrightness(Brightness::clamped(level)))
            .await
    }

    /// Asks the clock to publish its status.
    ///
    /// # Errors
    ///
    /// As [`send_command`](Self::send_command).
    pub async fn request_status(&self) -> Result<()> {
        self.send(&ClockCommand::GetStatus).await
    }

    /// Sets the clock's IANA timezone.
    ///
    /// # Errors
    ///
    /// Returns `Error::Value` for a blank name.
    pub async fn set_timezone(&self, timezone: &str) -> Result<()> {
        let command = ClockCommand::set_timezone(timezone)?;
        self.send(&command).await
    }

    /// Sets the clock to the current system time.
    ///
    /// # Errors
    ///
    /// As [`send_command`](Self::send_command).
    pub async fn sync_time(&self) -> Result<()> {
        self.send(&ClockCommand::sync_now()).await
    }

    /// Publishes a free-form text on the device's test topic.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` without an active device, otherwise as
    /// [`publish`](Self::publish).
    pub async fn send_test_message(&self, text: &str) -> Result<PublishOutcome> {
        let device = self.shared.require_device()?;
        let body = json!({
            "message": text,
            "clientId": self.shared.client_id,
            "timestamp": now_millis(),
        });
        self.publish(device.topics.test(), body, PublishOptions::default())
            .await
    }
}

impl<T: Transport> Shared<T> {
    fn record_command(&self) {
        let mut stats = self.stats.lock();
        stats.messages_sent += 1;
        stats.commands_sent += 1;
        stats.last_command_at = Some(Utc::now());
    }

    #[cfg(feature = "http")]
    async fn send_without_session(
        &self,
        device: &ActiveDevice,
        envelope: &CommandEnvelope,
    ) -> Result<()> {
        let Some(http) = &self.http else {
            return Err(Error::NotConnected);
        };

        http.send_command(&device.id, envelope).await?;

        self.record_command();
        tracing::debug!(device = %device.id, command = %envelope.command, "Command sent over HTTP");
        self.emit(ClientEvent::PublishCompleted {
            topic: device.topics.command().to_string(),
        });
        Ok(())
    }

    #[cfg(not(feature = "http"))]
    #[allow(clippy::unused_async)]
    async fn send_without_session(
        &self,
        _device: &ActiveDevice,
        _envelope: &CommandEnvelope,
    ) -> Result<()> {
        Err(Error::NotConnected)
    }

    /// Delivers queued messages over a fresh session, oldest first.
    ///
    /// Stops with `TransportError::Closed` when the session dies, leaving the
    /// undelivered entry at the head of the queue.
    pub(crate) async fn flush_queue(
        &self,
        session: &T::Session,
    ) -> std::result::Result<(), TransportError> {
        let max_attempts = self.queue_config.max_delivery_attempts.max(1);
        let mut delivered = 0usize;

        loop {
            let entry = self.queue.lock().dequeue();
            let Some(entry) = entry else {
                break;
            };

            let mut attempt = 0;
            let mut last_error = None;
            while attempt < max_attempts {
                attempt += 1;
                match session
                    .publish(&entry.topic, entry.payload.clone(), entry.options)
                    .await
                {
                    Ok(()) => {
                        self.touch();
                        last_error = None;
                        break;
                    }
                    Err(TransportError::Closed) => {
                        tracing::debug!(topic = %entry.topic, "Session closed during flush");
                        self.queue.lock().requeue_front(entry);
                        return Err(TransportError::Closed);
                    }
                    Err(e) => {
                        tracing::debug!(topic = %entry.topic, attempt, error = %e, "Queued delivery failed");
                        last_error = Some(e);
                    }
                }
            }

            match last_error {
                None => {
                    delivered += 1;
                    self.stats.lock().messages_sent += 1;
                    self.emit(ClientEvent::PublishCompleted {
                        topic: entry.topic,
                    });
                }
                Some(e) => {
                    tracing::warn!(
                        topic = %entry.topic,
                        attempts = attempt,
                        error = %e,
                        "Dropping queued message"
                    );
                    self.stats.lock().messages_dropped += 1;
                }
            }

            let remaining = !self.queue.lock().is_empty();
            if remaining && !self.queue_config.flush_delay.is_zero() {
                tokio::time::sleep(self.queue_config.flush_delay).await;
            }
        }

        if delivered > 0 {
            tracing::debug!(delivered, "Offline queue flushed");
        }
        Ok(())
    }
}

