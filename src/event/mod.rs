// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound message routing and client lifecycle events.
//!
//! Two ways to observe a client:
//!
//! - callbacks, registered on the [`EventRouter`] through
//!   [`ClockClient::on_topic`](crate::ClockClient::on_topic),
//!   [`ClockClient::on_message`](crate::ClockClient::on_message) and
//!   [`ClockClient::on_event`](crate::ClockClient::on_event)
//! - an async stream of [`ClientEvent`]s from the [`EventBus`]
//!
//! # Examples
//!
//! ```
//! use smartclock_lib::event::{ClientEvent, EventRouter};
//!
//! let router = EventRouter::new();
//! let mut rx = router.subscribe();
//!
//! router.emit(&ClientEvent::Offline);
//! assert_eq!(rx.try_recv().unwrap(), ClientEvent::Offline);
//! ```

mod client_event;
mod event_bus;
mod router;

pub use client_event::{ClientEvent, DisconnectReason};
pub use event_bus::EventBus;
pub use router::{EventRouter, HandlerId, InboundMessage};
