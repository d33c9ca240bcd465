// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport built on `rumqttc`.
//!
//! The `rumqttc` event loop reconnects on its own when polled after an
//! error. This transport stops polling at the first fatal error and reports
//! [`TransportEvent::Close`] instead, leaving backoff to the client.

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet,
};
use tokio::sync::{mpsc, oneshot};

use super::{
    Connection, ConnectOptions, EVENT_CHANNEL_CAPACITY, PublishOptions, QoS, Transport,
    TransportEvent, TransportSession, parse_broker_url,
};
use crate::error::TransportError;

/// Default capacity of the `rumqttc` request channel.
const DEFAULT_REQUEST_CAPACITY: usize = 10;

/// [`Transport`] that opens MQTT sessions over TCP.
///
/// # Examples
///
/// ```no_run
/// use smartclock_lib::ClockClient;
/// use smartclock_lib::transport::MqttTransport;
///
/// # async fn example() -> smartclock_lib::Result<()> {
/// let client = ClockClient::builder()
///     .broker_url("mqtt://192.168.1.50:1883")
///     .transport(MqttTransport::new())
///     .device("Kitchen Clock")
///     .build()?;
///
/// client.connect().await?;
/// client.snooze().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MqttTransport {
    request_capacity: usize,
}

impl MqttTransport {
    /// Creates a transport with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capacity of the outgoing request channel (default: 10).
    #[must_use]
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(1);
        self
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

/// An open MQTT session.
#[derive(Debug, Clone)]
pub struct MqttSession {
    client: AsyncClient,
}

impl Transport for MqttTransport {
    type Session = MqttSession;

    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Connection<MqttSession>, TransportError> {
        let (host, port) = parse_broker_url(&options.url)?;

        let mut mqtt_options = MqttOptions::new(&options.client_id, &host, port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(options.clean_session);

        if let Some((ref username, ref password)) = options.credentials {
            mqtt_options.set_credentials(username, password);
        }

        if let Some(will) = options.last_will {
            mqtt_options.set_last_will(rumqttc::LastWill::new(
                will.topic,
                will.payload,
                to_mqtt_qos(will.qos),
                will.retain,
            ));
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, self.request_capacity);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Signalled once with the outcome of the CONNECT handshake
        let (connack_tx, connack_rx) = oneshot::channel();

        tokio::spawn(async move {
            drive_event_loop(event_loop, events_tx, connack_tx).await;
        });

        match connack_rx.await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %host,
                    port = %port,
                    client_id = %options.client_id,
                    "Connected to MQTT broker"
                );
                Ok(Connection {
                    session: MqttSession { client },
                    events: events_rx,
                })
            }
            Ok(Err(reason)) => Err(TransportError::ConnectionFailed(reason)),
            Err(_) => Err(TransportError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
        }
    }
}

impl TransportSession for MqttSession {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(TransportError::Mqtt)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(TransportError::Mqtt)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, to_mqtt_qos(options.qos), options.retain, payload)
            .await
            .map_err(TransportError::Mqtt)
    }

    async fn end(&self) -> Result<(), TransportError> {
        self.client.disconnect().await.map_err(TransportError::Mqtt)
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Polls the `rumqttc` event loop and forwards notifications.
async fn drive_event_loop(
    mut event_loop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    connack_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut connack_tx = Some(connack_tx);

    loop {
        let event = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT connection acknowledged");
                let outcome = if connack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(format!("broker refused connection: {:?}", connack.code))
                };
                let refused = outcome.is_err();
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(outcome);
                }
                if refused {
                    break;
                }
                continue;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Message {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
                retained: publish.retain,
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                let _ = events.send(TransportEvent::Close).await;
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                let _ = events.send(TransportEvent::End).await;
                break;
            }
            Ok(Event::Incoming(_)) => TransportEvent::Activity,
            Ok(Event::Outgoing(_)) => continue,
            Err(e) => {
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Err(e.to_string()));
                    break;
                }

                tracing::warn!(error = %e, "MQTT event loop error");
                if matches!(e, ConnectionError::Io(_) | ConnectionError::NetworkTimeout) {
                    let _ = events.send(TransportEvent::Offline).await;
                }
                let _ = events.send(TransportEvent::Error(e.to_string())).await;
                let _ = events.send(TransportEvent::Close).await;
                break;
            }
        };

        // The client dropped the session
        if events.send(event).await.is_err() {
            break;
        }
    }
}
