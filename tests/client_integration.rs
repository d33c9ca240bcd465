// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client scenarios against the in-memory broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use smartclock_lib::event::{ClientEvent, DisconnectReason};
use smartclock_lib::transport::{EVENT_CHANNEL_CAPACITY, MemoryTransport, PublishOptions, QoS};
use smartclock_lib::{
    ClockClient, ConnectionState, Error, PublishOutcome, QueueConfig, ReconnectionPolicy,
    TransportError,
};
use tokio::sync::broadcast;

const COMMAND_TOPIC: &str = "smartclock/kitchen_clock/command";
const STATUS_TOPIC: &str = "smartclock/kitchen_clock/status";
const AUTH_TOPIC: &str = "smartclock/kitchen_clock/auth";
const TEST_TOPIC: &str = "smartclock/kitchen_clock/test";

fn kitchen_client(broker: &MemoryTransport) -> ClockClient<MemoryTransport> {
    ClockClient::builder()
        .transport(broker.clone())
        .device("Kitchen Clock")
        .client_id("test-panel")
        .health_check_interval(Duration::ZERO)
        .queue(QueueConfig::new().with_flush_delay(Duration::ZERO))
        .build()
        .unwrap()
}

fn json_of(payload: &[u8]) -> Value {
    serde_json::from_slice(payload).unwrap()
}

/// Waits for the first event matching `predicate`.
async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(50), async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received")
}

/// Answers auth requests on behalf of the clock.
fn clock_answers(broker: &MemoryTransport, answer: Value) {
    broker.respond_to(AUTH_TOPIC, move |request| {
        let body = json_of(&request.payload);
        let request_id = body["requestId"].as_str()?;
        Some((
            format!("smartclock/kitchen_clock/auth/response/{request_id}"),
            answer.to_string().into_bytes(),
        ))
    });
}

// ============================================================================
// Connection lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn connect_subscribes_and_announces_presence() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);

        client.connect().await.unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(broker.is_connected());

        let mut subscribed = broker.subscriptions();
        subscribed.sort();
        assert_eq!(
            subscribed,
            vec![
                "smartclock/kitchen_clock/alarm",
                "smartclock/kitchen_clock/sensors",
                "smartclock/kitchen_clock/status",
                "smartclock/kitchen_clock/test",
            ]
        );
        assert_eq!(client.subscriptions().len(), 4);

        let presence = json_of(&broker.retained(STATUS_TOPIC).unwrap());
        assert_eq!(presence["status"], "online");
        assert_eq!(presence["deviceId"], "Kitchen Clock");

        let will = broker.last_connect_options().unwrap().last_will.unwrap();
        assert_eq!(will.topic, STATUS_TOPIC);
        assert!(will.retain);
        assert_eq!(json_of(&will.payload)["status"], "offline");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_twice_is_a_no_op() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);

        client.connect().await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_without_device_or_transport() {
        let client = ClockClient::builder()
            .transport(MemoryTransport::new())
            .build()
            .unwrap();
        assert!(matches!(
            client.connect().await,
            Err(Error::Configuration(_))
        ));

        let client = ClockClient::<MemoryTransport>::builder()
            .device("Kitchen Clock")
            .build()
            .unwrap();
        assert!(matches!(
            client.connect().await,
            Err(Error::TransportUnavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_leaves_client_disconnected() {
        let broker = MemoryTransport::new();
        broker.refuse_connections(true);
        let client = kitchen_client(&broker);

        let result = client.connect().await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connect_is_rejected() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .queue(QueueConfig::new().with_flush_delay(Duration::from_millis(100)))
            .build()
            .unwrap();

        // Queued messages make the first connect pause while flushing
        for text in ["one", "two"] {
            client
                .publish("smartclock/kitchen_clock/test", text, PublishOptions::default())
                .await
                .unwrap();
        }

        let (first, second) = tokio::join!(client.connect(), client.connect());

        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::ConnectInProgress)));
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_connect_leaves_client_disconnected() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .queue(QueueConfig::new().with_flush_delay(Duration::from_secs(1)))
            .build()
            .unwrap();
        for text in ["one", "two"] {
            client
                .publish(TEST_TOPIC, text, PublishOptions::default())
                .await
                .unwrap();
        }

        let abandoned = tokio::time::timeout(Duration::from_millis(500), client.connect()).await;

        assert!(abandoned.is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.subscriptions().is_empty());

        client.connect().await.unwrap();

        assert_eq!(broker.connect_attempts(), 2);
        assert!(client.is_connected());
        assert_eq!(client.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_the_supervisor() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .reconnection(ReconnectionPolicy::new().with_initial_delay(Duration::from_secs(1)))
            .build()
            .unwrap();
        let other = client.clone();
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        // One remaining handle keeps the session supervised
        drop(client);
        broker.drop_connection();
        wait_for(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;
        assert_eq!(broker.connect_attempts(), 2);

        drop(other);
        broker.drop_connection();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(broker.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_ends_session_and_is_idempotent() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        let mut events = client.subscribe_events();

        client.connect().await.unwrap();
        client.disconnect().await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!broker.is_connected());
        assert!(client.subscriptions().is_empty());
        let presence = json_of(&broker.retained(STATUS_TOPIC).unwrap());
        assert_eq!(presence["status"], "offline");

        let event = wait_for(&mut events, |e| {
            matches!(e, ClientEvent::Disconnected { .. })
        })
        .await;
        assert_eq!(
            event,
            ClientEvent::Disconnected {
                reason: DisconnectReason::Requested
            }
        );

        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_observable() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        let mut state = client.watch_state();

        client.connect().await.unwrap();

        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
    }
}

// ============================================================================
// Commands
// ============================================================================

mod commands {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn kitchen_clock_alarm() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        client.connect().await.unwrap();

        client.set_alarm(7, 30, 0, true, "Wake").await.unwrap();

        let sent = broker.published_to(COMMAND_TOPIC);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].options.qos, QoS::AtLeastOnce);
        assert!(!sent[0].options.retain);

        let envelope = json_of(&sent[0].payload);
        assert_eq!(envelope["command"], "set_alarm");
        assert_eq!(
            envelope["data"],
            json!({"hour": 7, "minute": 30, "sound": 0, "enable": 1, "label": "Wake"})
        );
        assert!(envelope.get("auth").is_none());
        assert!(envelope["timestamp"].is_i64());

        let stats = client.stats();
        assert_eq!(stats.commands_sent, 1);
        assert!(stats.last_command_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn typed_commands() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        client.connect().await.unwrap();

        client.press_button(2).await.unwrap();
        client.set_brightness(150).await.unwrap();
        client.set_timezone("Europe/Paris").await.unwrap();
        client.snooze().await.unwrap();

        let commands: Vec<Value> = broker
            .published_to(COMMAND_TOPIC)
            .iter()
            .map(|m| json_of(&m.payload))
            .collect();

        assert_eq!(commands[0]["command"], "button_press");
        assert_eq!(commands[0]["data"], json!({"button": 2}));
        assert_eq!(commands[1]["data"], json!({"brightness": 100}));
        assert_eq!(commands[2]["data"], json!({"timezone": "Europe/Paris"}));
        assert_eq!(commands[3]["command"], "snooze");
        assert_eq!(commands[3]["data"], json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_arguments_publish_nothing() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        client.connect().await.unwrap();

        assert!(matches!(
            client.set_alarm(24, 0, 0, true, "").await,
            Err(Error::Value(_))
        ));
        assert!(matches!(
            client.set_alarm(7, 0, 0, true, &"x".repeat(33)).await,
            Err(Error::Value(_))
        ));
        assert!(matches!(client.press_button(5).await, Err(Error::Value(_))));
        assert!(matches!(client.set_timezone(" ").await, Err(Error::Value(_))));

        assert!(broker.published_to(COMMAND_TOPIC).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn command_requires_connection() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);

        assert!(matches!(client.snooze().await, Err(Error::NotConnected)));
        assert_eq!(client.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mandatory_auth_is_checked_before_connectivity() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .require_auth(true)
            .health_check_interval(Duration::ZERO)
            .build()
            .unwrap();

        let result = client.snooze().await;
        assert!(matches!(
            result,
            Err(Error::AuthenticationRequired { ref device_id }) if device_id == "Kitchen Clock"
        ));
        assert_eq!(client.queued(), 0);

        client.connect().await.unwrap();
        assert!(matches!(
            client.request_status().await,
            Err(Error::AuthenticationRequired { .. })
        ));
        assert!(broker.published_to(COMMAND_TOPIC).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stored_token_is_attached() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        client.tokens().save(
            "Kitchen Clock",
            "tok-123",
            Utc::now() + chrono::TimeDelta::hours(1),
        );
        client.connect().await.unwrap();

        client.reset_device().await.unwrap();

        let envelope = json_of(&broker.published_to(COMMAND_TOPIC)[0].payload);
        assert_eq!(
            envelope["auth"],
            json!({"token": "tok-123", "deviceId": "Kitchen Clock"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_publish_is_reported() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        client.connect().await.unwrap();
        broker.fail_publishes(true);

        let result = client.stop_alarm().await;

        assert!(matches!(result, Err(Error::Publish { ref topic, .. }) if topic == COMMAND_TOPIC));
        assert_eq!(client.stats().commands_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_goes_to_test_topic() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        client.connect().await.unwrap();

        let outcome = client.send_test_message("hello clock").await.unwrap();

        assert_eq!(outcome, PublishOutcome::Sent);
        let sent = broker.published_to("smartclock/kitchen_clock/test");
        let body = json_of(&sent[0].payload);
        assert_eq!(body["message"], "hello clock");
        assert_eq!(body["clientId"], "test-panel");
    }
}

// ============================================================================
// Offline queue
// ============================================================================

mod offline_queue {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn queued_publish_is_flushed_first() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);

        let outcome = client
            .publish("smartclock/kitchen_clock/test", "hello", PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Queued);
        assert_eq!(client.queued(), 1);
        assert_eq!(client.stats().messages_queued, 1);

        client.connect().await.unwrap();

        let published = broker.published();
        assert_eq!(published[0].topic, "smartclock/kitchen_clock/test");
        assert_eq!(published[0].payload, b"hello");
        assert_eq!(published[1].topic, STATUS_TOPIC);
        assert_eq!(client.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_drops_oldest() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .queue(
                QueueConfig::new()
                    .with_capacity(2)
                    .with_flush_delay(Duration::ZERO),
            )
            .build()
            .unwrap();

        for text in ["a", "b", "c"] {
            client
                .publish("smartclock/kitchen_clock/test", text, PublishOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(client.queued(), 2);
        assert_eq!(client.stats().messages_dropped, 1);

        client.connect().await.unwrap();

        let payloads: Vec<Vec<u8>> = broker
            .published_to("smartclock/kitchen_clock/test")
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(payloads, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn large_backlog_does_not_stall_inbound_traffic() {
        let backlog = EVENT_CHANNEL_CAPACITY * 2 + 88;
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .queue(
                QueueConfig::new()
                    .with_capacity(backlog)
                    .with_flush_delay(Duration::from_millis(1)),
            )
            .build()
            .unwrap();
        let echoed = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&echoed);
        client.on_topic(TEST_TOPIC, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..backlog {
            client
                .publish(TEST_TOPIC, format!("m{i}"), PublishOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(client.queued(), backlog);

        tokio::time::timeout(Duration::from_secs(20), client.connect())
            .await
            .expect("connect stalled")
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(client.queued(), 0);
        assert_eq!(broker.published_to(TEST_TOPIC).len(), backlog);
        // Every echo of the flushed messages reached the handler
        assert_eq!(echoed.load(Ordering::SeqCst), backlog);
    }

    #[tokio::test(start_paused = true)]
    async fn undeliverable_entries_are_dropped_after_bounded_attempts() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .reconnection(ReconnectionPolicy::new().with_initial_delay(Duration::from_secs(1)))
            .queue(
                QueueConfig::new()
                    .with_flush_delay(Duration::ZERO)
                    .with_max_delivery_attempts(3),
            )
            .build()
            .unwrap();
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        broker.drop_connection();
        wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
        for text in ["a", "b"] {
            let outcome = client
                .publish(TEST_TOPIC, text, PublishOptions::default())
                .await
                .unwrap();
            assert_eq!(outcome, PublishOutcome::Queued);
        }
        broker.fail_publishes(true);
        wait_for(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;

        assert_eq!(broker.publish_attempts(TEST_TOPIC), 6);
        assert!(broker.published_to(TEST_TOPIC).is_empty());
        assert_eq!(client.queued(), 0);
        assert_eq!(client.stats().messages_dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_stays_queued_when_session_dies_mid_flush() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .queue(QueueConfig::new().with_flush_delay(Duration::from_secs(1)))
            .build()
            .unwrap();
        for text in ["a", "b", "c"] {
            client
                .publish(TEST_TOPIC, text, PublishOptions::default())
                .await
                .unwrap();
        }

        let (outcome, ()) = tokio::join!(client.connect(), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            broker.sever_connection();
        });

        assert!(matches!(outcome, Err(Error::Transport(TransportError::Closed))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.queued(), 2);

        client.connect().await.unwrap();

        let payloads: Vec<Vec<u8>> = broker
            .published_to(TEST_TOPIC)
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(client.queued(), 0);
    }
}

// ============================================================================
// Authentication
// ============================================================================

mod authentication {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn accepted_password_stores_token() {
        let broker = MemoryTransport::new();
        clock_answers(
            &broker,
            json!({"success": true, "token": "abc", "expiry": 3_600_000}),
        );
        let client = kitchen_client(&broker);
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        let token = client.authenticate("secret").await.unwrap();

        assert_eq!(token.token, "abc");
        assert_eq!(token.device_id, "Kitchen Clock");
        assert!(token.expires_at > Utc::now() + chrono::TimeDelta::minutes(59));
        assert_eq!(client.token().unwrap().token, "abc");
        assert_eq!(client.tokens().last_used_device().as_deref(), Some("Kitchen Clock"));

        let request = json_of(&broker.published_to(AUTH_TOPIC)[0].payload);
        assert_eq!(request["type"], "auth_request");
        assert_eq!(request["password"], "secret");
        assert_eq!(request["clientId"], "test-panel");

        // The temporary response subscription is gone
        assert!(!broker.subscriptions().iter().any(|t| t.contains("/auth/response/")));

        wait_for(&mut events, |e| matches!(e, ClientEvent::AuthSucceeded { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn default_lifetime_when_expiry_missing() {
        let broker = MemoryTransport::new();
        clock_answers(&broker, json!({"success": true, "token": "abc"}));
        let client = kitchen_client(&broker);
        client.connect().await.unwrap();

        let token = client.authenticate("secret").await.unwrap();

        assert!(token.expires_at > Utc::now() + chrono::TimeDelta::hours(23));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_password_clears_token() {
        let broker = MemoryTransport::new();
        clock_answers(
            &broker,
            json!({"success": false, "message": "invalid password"}),
        );
        let client = kitchen_client(&broker);
        client.tokens().save(
            "Kitchen Clock",
            "stale",
            Utc::now() + chrono::TimeDelta::hours(1),
        );
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        let result = client.authenticate("wrong").await;

        assert!(matches!(
            result,
            Err(Error::AuthenticationFailed(ref reason)) if reason == "invalid password"
        ));
        assert!(client.token().is_none());
        wait_for(&mut events, |e| matches!(e, ClientEvent::AuthFailed { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn unsendable_request_clears_token() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        client.tokens().save(
            "Kitchen Clock",
            "stale",
            Utc::now() + chrono::TimeDelta::hours(1),
        );
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        broker.fail_publishes(true);
        let result = client.authenticate("secret").await;

        assert!(matches!(
            result,
            Err(Error::Publish { ref topic, .. }) if topic == AUTH_TOPIC
        ));
        assert!(client.token().is_none());
        assert!(!broker.subscriptions().iter().any(|t| t.contains("/auth/response/")));
        wait_for(&mut events, |e| matches!(e, ClientEvent::AuthFailed { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn success_without_token_is_malformed() {
        let broker = MemoryTransport::new();
        clock_answers(&broker, json!({"success": true}));
        let client = kitchen_client(&broker);
        client.connect().await.unwrap();

        let result = client.authenticate("secret").await;

        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
        assert!(client.token().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .auth_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        client.tokens().save(
            "Kitchen Clock",
            "old",
            Utc::now() + chrono::TimeDelta::hours(1),
        );
        client.connect().await.unwrap();

        let result = client.authenticate("secret").await;

        assert!(matches!(
            result,
            Err(Error::Timeout { operation: "authentication", after_ms: 5000 })
        ));
        assert!(client.token().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn authenticate_preconditions() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);

        assert!(matches!(client.authenticate("").await, Err(Error::Value(_))));
        assert!(matches!(
            client.authenticate("secret").await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_forgets_token() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        client.tokens().save(
            "Kitchen Clock",
            "abc",
            Utc::now() + chrono::TimeDelta::hours(1),
        );

        client.logout();

        assert!(client.token().is_none());
    }
}

// ============================================================================
// Reconnection and health check
// ============================================================================

mod reconnection {
    use super::*;

    fn resilient_client(
        broker: &MemoryTransport,
        policy: ReconnectionPolicy,
    ) -> ClockClient<MemoryTransport> {
        ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .reconnection(policy)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_gives_up_after_max_attempts() {
        let broker = MemoryTransport::new();
        let client = resilient_client(
            &broker,
            ReconnectionPolicy::new()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_secs(1))
                .with_backoff_multiplier(2.0),
        );
        client.connect().await.unwrap();
        let mut events = client.subscribe_events();

        broker.refuse_connections(true);
        broker.drop_connection();

        let mut delays = Vec::new();
        let exhausted = loop {
            match wait_for(&mut events, |e| {
                matches!(
                    e,
                    ClientEvent::ReconnectAttempt { .. } | ClientEvent::ReconnectExhausted { .. }
                )
            })
            .await
            {
                ClientEvent::ReconnectAttempt { attempt, delay } => delays.push((attempt, delay)),
                other => break other,
            }
        };

        assert_eq!(
            delays,
            vec![
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(2)),
                (3, Duration::from_secs(4)),
            ]
        );
        assert_eq!(exhausted, ClientEvent::ReconnectExhausted { attempts: 3 });
        assert_eq!(broker.connect_attempts(), 4);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let broker = MemoryTransport::new();
        let client = resilient_client(&broker, ReconnectionPolicy::default());
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();
        wait_for(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;

        broker.fail_next_connects(2);
        broker.drop_connection();

        let lost = wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
        assert_eq!(
            lost,
            ClientEvent::Disconnected {
                reason: DisconnectReason::ConnectionLost
            }
        );
        wait_for(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;

        assert_eq!(broker.connect_attempts(), 4);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(broker.subscriptions().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_policy_stays_disconnected() {
        let broker = MemoryTransport::new();
        let client = resilient_client(&broker, ReconnectionPolicy::disabled());
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        broker.drop_connection();
        wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let broker = MemoryTransport::new();
        let client = resilient_client(
            &broker,
            ReconnectionPolicy::new().with_initial_delay(Duration::from_secs(10)),
        );
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        broker.drop_connection();
        wait_for(&mut events, |e| matches!(e, ClientEvent::ReconnectAttempt { .. })).await;
        client.disconnect().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_notification() {
        let broker = MemoryTransport::new();
        let client = resilient_client(&broker, ReconnectionPolicy::disabled());
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        broker.go_offline();

        wait_for(&mut events, |e| *e == ClientEvent::Offline).await;
        wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_traffic_keeps_session_alive() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::from_secs(5))
            .reconnection(ReconnectionPolicy::new().with_initial_delay(Duration::from_secs(1)))
            .build()
            .unwrap();
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        // Fire-and-forget publishes on an unsubscribed topic produce no
        // inbound traffic at all
        let fire_and_forget = PublishOptions::default().with_qos(QoS::AtMostOnce);
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            client
                .publish(COMMAND_TOPIC, "ping", fire_and_forget)
                .await
                .unwrap();
        }

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(broker.connect_attempts(), 1);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, ClientEvent::Disconnected { .. }), "{event:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_is_treated_as_stale() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::from_secs(5))
            .reconnection(ReconnectionPolicy::new().with_initial_delay(Duration::from_secs(1)))
            .build()
            .unwrap();
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        let lost = wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
        assert_eq!(
            lost,
            ClientEvent::Disconnected {
                reason: DisconnectReason::Stale
            }
        );

        wait_for(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;
        assert_eq!(broker.connect_attempts(), 2);
    }
}

// ============================================================================
// Routing, registry and device switching
// ============================================================================

mod routing {
    use super::*;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_does_not_stop_others() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        let topic_hits = Arc::new(AtomicUsize::new(0));
        let global_hits = Arc::new(AtomicUsize::new(0));

        client.on_topic("smartclock/+/alarm", |_| panic!("handler bug"));
        let hits = Arc::clone(&topic_hits);
        client.on_topic("smartclock/+/alarm", move |msg| {
            assert_eq!(msg.payload.as_json().unwrap()["ringing"], true);
            hits.fetch_add(1, Ordering::SeqCst);
        });
        let hits = Arc::clone(&global_hits);
        client.on_message(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        client.connect().await.unwrap();
        settle().await;
        let global_before = global_hits.load(Ordering::SeqCst);

        assert!(broker.inject("smartclock/kitchen_clock/alarm", br#"{"ringing":true}"#.to_vec()));
        settle().await;

        assert_eq!(topic_hits.load(Ordering::SeqCst), 1);
        assert_eq!(global_hits.load(Ordering::SeqCst), global_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn text_payloads_are_delivered_as_text() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        client.on_topic("smartclock/kitchen_clock/test", move |msg| {
            sink.lock().push(msg.payload.as_text().map(str::to_string));
        });

        client.connect().await.unwrap();
        broker.inject("smartclock/kitchen_clock/test", "plain words");
        settle().await;

        assert_eq!(*received.lock(), vec![Some("plain words".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_tracks_devices_on_the_bus() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();
        client
            .subscribe_topic("smartclock/+/status", QoS::AtLeastOnce)
            .await
            .unwrap();

        broker.inject(
            "smartclock/hall_clock/status",
            json!({"deviceId": "Hall Clock", "status": "online", "battery": 80}).to_string(),
        );

        wait_for(&mut events, |e| {
            *e == ClientEvent::DeviceObserved {
                device_id: "Hall Clock".to_string(),
                is_new: true,
            }
        })
        .await;

        let hall = client.registry().get("Hall Clock").unwrap();
        assert!(hall.is_online());
        assert_eq!(hall.last_payload["battery"], 80);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_device_moves_subscriptions_and_presence() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();

        let topics = client.set_device("Bedroom Clock").await.unwrap();

        assert_eq!(topics.command(), "smartclock/bedroom_clock/command");
        assert!(broker
            .subscriptions()
            .iter()
            .all(|t| t.starts_with("smartclock/bedroom_clock/")));
        assert_eq!(client.subscriptions().len(), 4);
        assert_eq!(
            json_of(&broker.retained(STATUS_TOPIC).unwrap())["status"],
            "offline"
        );
        assert_eq!(
            json_of(&broker.retained("smartclock/bedroom_clock/status").unwrap())["status"],
            "online"
        );

        wait_for(&mut events, |e| {
            *e == ClientEvent::DeviceSwitched {
                previous: Some("Kitchen Clock".to_string()),
                current: "Bedroom Clock".to_string(),
            }
        })
        .await;

        client.snooze().await.unwrap();
        assert_eq!(
            broker.published_to("smartclock/bedroom_clock/command").len(),
            1
        );

        // Same device again changes nothing
        let published = broker.published().len();
        client.set_device("Bedroom Clock").await.unwrap();
        assert_eq!(broker.published().len(), published);
    }

    #[tokio::test(start_paused = true)]
    async fn extra_topics_survive_reconnect() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .device("Kitchen Clock")
            .health_check_interval(Duration::ZERO)
            .reconnection(ReconnectionPolicy::new().with_initial_delay(Duration::from_millis(10)))
            .build()
            .unwrap();
        let mut events = client.subscribe_events();
        client.connect().await.unwrap();
        client
            .subscribe_topic("smartclock/+/sensors", QoS::AtMostOnce)
            .await
            .unwrap();

        broker.drop_connection();
        wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
        wait_for(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;

        assert!(broker
            .subscriptions()
            .contains(&"smartclock/+/sensors".to_string()));

        client.unsubscribe_topic("smartclock/+/sensors").await.unwrap();
        assert!(!broker
            .subscriptions()
            .contains(&"smartclock/+/sensors".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_last_device_uses_token_store() {
        let broker = MemoryTransport::new();
        let client = ClockClient::builder()
            .transport(broker.clone())
            .build()
            .unwrap();
        assert!(client.restore_last_device().await.unwrap().is_none());

        client.tokens().save(
            "Bedroom Clock",
            "abc",
            Utc::now() + chrono::TimeDelta::hours(1),
        );
        let topics = client.restore_last_device().await.unwrap().unwrap();

        assert_eq!(topics.status(), "smartclock/bedroom_clock/status");
        assert_eq!(client.active_device().as_deref(), Some("Bedroom Clock"));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_removes_handlers() {
        let broker = MemoryTransport::new();
        let client = kitchen_client(&broker);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        client.on_event(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        client.connect().await.unwrap();

        client.destroy().await;
        let after_destroy = hits.load(Ordering::SeqCst);
        client.connect().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), after_destroy);
    }
}
