// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `SmartClock` Lib - A Rust library to remote-control `SmartClock` devices.
//!
//! The client talks to clocks over a publish/subscribe broker (MQTT) and
//! can fall back to plain HTTP for commands while the broker is out of
//! reach.
//!
//! # Supported Features
//!
//! - **Commands**: alarms, snooze, button presses, brightness, timezone,
//!   time sync, status requests, reset
//! - **Authentication**: password round-trip with the clock, persisted
//!   session tokens attached to every command
//! - **Resilience**: exponential reconnect backoff, health check, offline
//!   queue for plain publishes, retained presence with last-will
//! - **Events**: per-topic and global message handlers, lifecycle events,
//!   a registry of devices seen on the bus
//! - **Multiple devices**: switch the active device at runtime
//!
//! # Quick Start
//!
//! ```no_run
//! use smartclock_lib::ClockClient;
//! use smartclock_lib::transport::MqttTransport;
//!
//! #[tokio::main]
//! async fn main() -> smartclock_lib::Result<()> {
//!     let client = ClockClient::builder()
//!         .transport(MqttTransport::new())
//!         .broker_url("mqtt://192.168.1.50:1883")
//!         .device("Kitchen Clock")
//!         .build()?;
//!
//!     client.connect().await?;
//!     client.authenticate("clock-password").await?;
//!
//!     // Wake up at 07:30 with the default sound
//!     client.set_alarm(7, 30, 0, true, "Wake").await?;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Listening to the clock
//!
//! ```no_run
//! use smartclock_lib::ClockClient;
//! use smartclock_lib::event::ClientEvent;
//! use smartclock_lib::transport::MqttTransport;
//!
//! # async fn example() -> smartclock_lib::Result<()> {
//! let client = ClockClient::builder()
//!     .transport(MqttTransport::new())
//!     .device("Bedroom Clock")
//!     .build()?;
//!
//! client.on_topic("smartclock/+/alarm", |msg| {
//!     println!("alarm on {}: {}", msg.topic, msg.payload);
//! });
//! client.on_event(|event| {
//!     if let ClientEvent::ReconnectAttempt { attempt, delay } = event {
//!         println!("reconnecting (attempt {attempt}) in {delay:?}");
//!     }
//! });
//!
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod client;
pub mod command;
pub mod error;
pub mod event;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod transport;
pub mod types;

pub use client::{
    ClientConfig, ClockClient, ClockClientBuilder, ConnectionState, PublishOutcome,
    ReconnectionPolicy, SendStats, SubscriptionRecord,
};
pub use command::{ClockCommand, Command};
pub use error::{Error, Result, StorageError, TransportError, ValueError};
pub use queue::QueueConfig;
pub use types::{Alarm, Brightness, Button};
