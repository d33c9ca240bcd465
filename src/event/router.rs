// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message handlers and event listeners.
//!
//! The [`EventRouter`] fans inbound messages out to handlers and client
//! events out to listeners. Every handler runs isolated: a panicking handler
//! is logged and skipped, the remaining handlers still run, and the client
//! keeps going.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{ClientEvent, EventBus};
use crate::protocol::{Payload, topic_matches};

/// Identifies a registered handler or listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler({})", self.0)
    }
}

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Decoded payload.
    pub payload: Payload,
    /// Whether the broker replayed a retained message.
    pub retained: bool,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Decodes a raw message stamped with the current time.
    #[must_use]
    pub fn decode(topic: impl Into<String>, payload: &[u8], retained: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: Payload::decode(payload),
            retained,
            received_at: Utc::now(),
        }
    }
}

type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;
type EventListener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Dispatches messages and events to registered callbacks.
///
/// Per-topic handlers run first, in registration order, followed by global
/// handlers in registration order.
///
/// # Examples
///
/// ```
/// use smartclock_lib::event::{EventRouter, InboundMessage};
///
/// let router = EventRouter::new();
/// router.on_topic("smartclock/+/alarm", |msg| println!("alarm: {}", msg.payload));
///
/// let invoked = router.dispatch(&InboundMessage::decode(
///     "smartclock/kitchen_clock/alarm",
///     br#"{"ringing":true}"#,
///     false,
/// ));
/// assert_eq!(invoked, 1);
/// ```
pub struct EventRouter {
    next_id: AtomicU64,
    topic_handlers: RwLock<Vec<(HandlerId, String, MessageHandler)>>,
    global_handlers: RwLock<Vec<(HandlerId, MessageHandler)>>,
    listeners: RwLock<Vec<(HandlerId, EventListener)>>,
    bus: EventBus,
}

impl EventRouter {
    /// Creates a router without handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            topic_handlers: RwLock::new(Vec::new()),
            global_handlers: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            bus: EventBus::new(),
        }
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a handler for messages matching an MQTT topic filter.
    pub fn on_topic<F>(&self, filter: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.topic_handlers
            .write()
            .push((id, filter.into(), Arc::new(handler)));
        id
    }

    /// Registers a handler for every inbound message.
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.global_handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Registers a listener for client events.
    pub fn on_event<F>(&self, listener: F) -> HandlerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a handler or listener.
    ///
    /// Returns `true` if something was removed.
    pub fn remove(&self, id: HandlerId) -> bool {
        fn remove_from<T>(list: &RwLock<Vec<T>>, matches: impl Fn(&T) -> bool) -> bool {
            let mut list = list.write();
            let before = list.len();
            list.retain(|entry| !matches(entry));
            list.len() != before
        }

        remove_from(&self.topic_handlers, |(h, _, _)| *h == id)
            || remove_from(&self.global_handlers, |(h, _)| *h == id)
            || remove_from(&self.listeners, |(h, _)| *h == id)
    }

    /// Removes every handler and listener.
    ///
    /// Broadcast receivers obtained from [`subscribe`](Self::subscribe) are
    /// not affected.
    pub fn clear(&self) {
        self.topic_handlers.write().clear();
        self.global_handlers.write().clear();
        self.listeners.write().clear();
    }

    /// Number of registered handlers and listeners.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.topic_handlers.read().len()
            + self.global_handlers.read().len()
            + self.listeners.read().len()
    }

    /// Delivers a message to matching handlers.
    ///
    /// Returns how many handlers ran to completion.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        // Snapshot so handlers may register or remove handlers themselves
        let topic_handlers: Vec<(HandlerId, MessageHandler)> = self
            .topic_handlers
            .read()
            .iter()
            .filter(|(_, filter, _)| topic_matches(filter, &message.topic))
            .map(|(id, _, handler)| (*id, Arc::clone(handler)))
            .collect();
        let global_handlers: Vec<(HandlerId, MessageHandler)> = self
            .global_handlers
            .read()
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();

        if topic_handlers.is_empty() && global_handlers.is_empty() {
            tracing::trace!(topic = %message.topic, "No handler for message");
            return 0;
        }

        let mut completed = 0;
        for (id, handler) in topic_handlers.into_iter().chain(global_handlers) {
            if invoke(id, || handler(message)) {
                completed += 1;
            }
        }
        completed
    }

    /// Delivers an event to listeners and to the broadcast bus.
    pub fn emit(&self, event: &ClientEvent) {
        let listeners: Vec<(HandlerId, EventListener)> = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in listeners {
            invoke(id, || listener(event));
        }

        self.bus.publish(event.clone());
    }

    /// Returns a broadcast receiver of every emitted event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.bus.subscribe()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("topic_handlers", &self.topic_handlers.read().len())
            .field("global_handlers", &self.global_handlers.read().len())
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

/// Runs a callback, containing any panic. Returns `true` on normal return.
fn invoke(id: HandlerId, callback: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(panic) => {
            tracing::error!(handler = %id, panic = %panic_message(&*panic), "Handler panicked");
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;

    fn message(topic: &str) -> InboundMessage {
        InboundMessage::decode(topic, br#"{"status":"ok"}"#, false)
    }

    #[test]
    fn topic_handlers_run_before_global_in_order() {
        let router = EventRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        router.on_message(move |_| o.lock().push("global"));
        let o = Arc::clone(&order);
        router.on_topic("clock/status", move |_| o.lock().push("topic-1"));
        let o = Arc::clone(&order);
        router.on_topic("clock/#", move |_| o.lock().push("topic-2"));

        assert_eq!(router.dispatch(&message("clock/status")), 3);
        assert_eq!(*order.lock(), ["topic-1", "topic-2", "global"]);
    }

    #[test]
    fn non_matching_topic_handler_is_skipped() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        router.on_topic("clock/alarm", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(router.dispatch(&message("clock/status")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        router.on_message(|_| panic!("handler bug"));
        let h = Arc::clone(&hits);
        router.on_message(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(router.dispatch(&message("clock/status")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_bus() {
        let router = EventRouter::new();
        let mut rx = router.subscribe();
        router.on_event(|_| panic!("listener bug"));

        router.emit(&ClientEvent::Offline);
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Offline);
    }

    #[test]
    fn remove_and_clear() {
        let router = EventRouter::new();
        let a = router.on_message(|_| {});
        let b = router.on_event(|_| {});
        router.on_topic("x", |_| {});
        assert_eq!(router.handler_count(), 3);

        assert!(router.remove(a));
        assert!(!router.remove(a));
        assert!(router.remove(b));
        assert_eq!(router.handler_count(), 1);

        router.clear();
        assert_eq!(router.handler_count(), 0);
    }

    #[test]
    fn handler_may_register_during_dispatch() {
        let router = Arc::new(EventRouter::new());
        let r = Arc::clone(&router);
        router.on_message(move |_| {
            r.on_event(|_| {});
        });

        router.dispatch(&message("clock/status"));
        assert_eq!(router.handler_count(), 2);
    }

    #[test]
    fn panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*boxed), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*boxed), "non-string panic payload");
    }
}
