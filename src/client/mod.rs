// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SmartClock client.
//!
//! A [`ClockClient`] owns one pub/sub session on behalf of one active
//! device at a time. It is created through [`ClockClientBuilder`], cheap to
//! clone (clones share the same session), and fully independent of any
//! other client object.
//!
//! The implementation is split by concern:
//!
//! - `connection`: connect, disconnect, device switching and the supervisor
//!   task (event pump, health check, reconnect backoff)
//! - `dispatch`: commands, plain publishes and the offline queue flush
//! - `auth`: the password/token round-trip

mod auth;
mod config;
mod connection;
mod dispatch;
mod state;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::{SessionToken, TokenStore};
use crate::error::{Error, Result};
use crate::event::{ClientEvent, EventRouter, HandlerId, InboundMessage};
use crate::protocol::{AuthResponse, TopicSet};
use crate::queue::{OfflineQueue, QueueConfig};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::storage::{KeyValueStore, MemoryStore};
#[cfg(feature = "http")]
use crate::transport::HttpFallback;
use crate::transport::{QoS, Transport};

pub use config::{ClientConfig, ReconnectionPolicy};
pub use state::{ConnectionState, PublishOutcome, SendStats, SubscriptionRecord};

/// The device the client currently talks to.
#[derive(Debug, Clone)]
pub(crate) struct ActiveDevice {
    pub(crate) id: String,
    pub(crate) topics: TopicSet,
}

/// State shared by every clone of a client and its supervisor task.
pub(crate) struct Shared<T: Transport> {
    pub(crate) transport: Option<T>,
    pub(crate) config: ClientConfig,
    pub(crate) reconnection: ReconnectionPolicy,
    pub(crate) queue_config: QueueConfig,
    pub(crate) client_id: String,
    #[cfg(feature = "http")]
    pub(crate) http: Option<HttpFallback>,
    pub(crate) tokens: TokenStore,
    pub(crate) router: EventRouter,
    pub(crate) registry: DeviceRegistry,
    pub(crate) device: RwLock<Option<ActiveDevice>>,
    pub(crate) session: RwLock<Option<Arc<T::Session>>>,
    pub(crate) state: watch::Sender<ConnectionState>,
    /// Serializes connect, reconnect, disconnect and device switches.
    pub(crate) transition: tokio::sync::Mutex<()>,
    pub(crate) supervisor: Mutex<Option<JoinHandle<()>>>,
    pub(crate) queue: Mutex<OfflineQueue>,
    pub(crate) subscriptions: RwLock<Vec<SubscriptionRecord>>,
    /// Topics added with `subscribe_topic`, restored on every connection.
    pub(crate) extra_topics: RwLock<Vec<(String, QoS)>>,
    pub(crate) pending_auth: Mutex<HashMap<String, oneshot::Sender<AuthResponse>>>,
    pub(crate) last_activity: Mutex<Instant>,
    pub(crate) attempts: AtomicU32,
    pub(crate) stats: Mutex<SendStats>,
}

impl<T: Transport> Shared<T> {
    pub(crate) fn active_device(&self) -> Option<ActiveDevice> {
        self.device.read().clone()
    }

    pub(crate) fn require_device(&self) -> Result<ActiveDevice> {
        self.active_device()
            .ok_or_else(|| Error::Configuration("no active device selected".to_string()))
    }

    pub(crate) fn current_session(&self) -> Option<Arc<T::Session>> {
        self.session.read().clone()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        tracing::trace!(?event, "Client event");
        self.router.emit(&event);
    }

    pub(crate) fn set_state(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        if from != to {
            tracing::debug!(from = %from, to = %to, "Connection state changed");
            self.emit(ClientEvent::StateChanged { from, to });
        }
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub(crate) fn silence(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub(crate) fn abort_supervisor(&self) {
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Remote control for SmartClock devices.
///
/// # Examples
///
/// ```
/// use smartclock_lib::ClockClient;
/// use smartclock_lib::transport::MemoryTransport;
///
/// # async fn example() -> smartclock_lib::Result<()> {
/// let client = ClockClient::builder()
///     .transport(MemoryTransport::new())
///     .device("Kitchen Clock")
///     .build()?;
///
/// client.on_topic("smartclock/+/alarm", |msg| println!("alarm: {}", msg.payload));
///
/// client.connect().await?;
/// client.set_alarm(7, 30, 0, true, "Wake").await?;
/// client.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct ClockClient<T: Transport> {
    shared: Arc<Shared<T>>,
    owner: Arc<Owner<T>>,
}

impl<T: Transport> Clone for ClockClient<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            owner: Arc::clone(&self.owner),
        }
    }
}

/// Shared by the clones of a client but never by its supervisor. Dropping
/// the last clone stops the supervisor and releases the session.
struct Owner<T: Transport> {
    shared: Weak<Shared<T>>,
}

impl<T: Transport> Drop for Owner<T> {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared.abort_supervisor();
        if shared.session.write().take().is_some() {
            tracing::debug!(client_id = %shared.client_id, "Client dropped while connected");
        }
    }
}

impl<T: Transport> std::fmt::Debug for ClockClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockClient")
            .field("client_id", &self.shared.client_id)
            .field("device", &self.active_device())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ClockClient<T> {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ClockClientBuilder<T> {
        ClockClientBuilder::new()
    }

    /// Client identifier presented to the broker.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    /// The configuration the client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Identifier of the active device.
    #[must_use]
    pub fn active_device(&self) -> Option<String> {
        self.shared.device.read().as_ref().map(|d| d.id.clone())
    }

    /// Topic set of the active device.
    #[must_use]
    pub fn topics(&self) -> Option<TopicSet> {
        self.shared.device.read().as_ref().map(|d| d.topics.clone())
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns `true` while the session is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Acknowledged subscriptions of the current session.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.shared.subscriptions.read().clone()
    }

    /// Send counters.
    #[must_use]
    pub fn stats(&self) -> SendStats {
        self.shared.stats.lock().clone()
    }

    /// Number of messages waiting in the offline queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// The token store.
    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.shared.tokens
    }

    /// The active device's valid token, if any.
    #[must_use]
    pub fn token(&self) -> Option<SessionToken> {
        let device = self.active_device()?;
        self.shared.tokens.load(&device)
    }

    /// The registry of devices seen on the bus.
    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.shared.registry
    }

    /// Devices seen on the bus, most recent first.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.shared.registry.devices()
    }

    /// Registers a handler for inbound messages matching an MQTT filter.
    ///
    /// Topic handlers run before global handlers, in registration order.
    pub fn on_topic<F>(&self, filter: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.router.on_topic(filter, handler)
    }

    /// Registers a handler for every inbound message.
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.router.on_message(handler)
    }

    /// Registers a listener for client events.
    pub fn on_event<F>(&self, listener: F) -> HandlerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.router.on_event(listener)
    }

    /// Removes a handler or listener.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.shared.router.remove(id)
    }

    /// Returns an async stream of client events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.router.subscribe()
    }

    /// Disconnects and removes every handler and listener.
    pub async fn destroy(&self) {
        self.disconnect().await;
        self.shared.router.clear();
        tracing::debug!(client_id = %self.shared.client_id, "Client destroyed");
    }
}

/// Builder for [`ClockClient`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use smartclock_lib::{ClockClient, ReconnectionPolicy};
/// use smartclock_lib::transport::MqttTransport;
///
/// # fn example() -> smartclock_lib::Result<()> {
/// let client = ClockClient::builder()
///     .transport(MqttTransport::new())
///     .broker_url("mqtt://192.168.1.50:1883")
///     .credentials("mqtt_user", "mqtt_password")
///     .device("Bedroom Clock")
///     .require_auth(true)
///     .reconnection(ReconnectionPolicy::new().with_max_attempts(5))
///     .health_check_interval(Duration::from_secs(15))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClockClientBuilder<T: Transport> {
    transport: Option<T>,
    config: ClientConfig,
    reconnection: ReconnectionPolicy,
    queue: QueueConfig,
    storage: Option<Arc<dyn KeyValueStore>>,
    device: Option<String>,
    #[cfg(feature = "http")]
    http: Option<HttpFallback>,
}

impl<T: Transport> std::fmt::Debug for ClockClientBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockClientBuilder")
            .field("has_transport", &self.transport.is_some())
            .field("config", &self.config)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ClockClientBuilder<T> {
    /// Creates a builder with default settings and no transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: None,
            config: ClientConfig::default(),
            reconnection: ReconnectionPolicy::default(),
            queue: QueueConfig::default(),
            storage: None,
            device: None,
            #[cfg(feature = "http")]
            http: None,
        }
    }

    /// Sets the transport used to open sessions.
    #[must_use]
    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the broker URL.
    #[must_use]
    pub fn broker_url(mut self, url: impl Into<String>) -> Self {
        self.config.broker_url = url.into();
        self
    }

    /// Sets the topic prefix (default: `smartclock`).
    #[must_use]
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    /// Sets the client identifier.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Sets broker credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Sets the connect deadline.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the authentication deadline.
    #[must_use]
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout = timeout;
        self
    }

    /// Sets the health-check period (zero disables it).
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    /// Requires a valid token for every command.
    #[must_use]
    pub fn require_auth(mut self, require: bool) -> Self {
        self.config.require_auth = require;
        self
    }

    /// Sets the fallback token lifetime.
    #[must_use]
    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.token_lifetime = lifetime;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Sets the offline queue configuration.
    #[must_use]
    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    /// Sets the key-value store backing the token store (default: in memory).
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the initially active device.
    #[must_use]
    pub fn device(mut self, device_id: impl Into<String>) -> Self {
        self.device = Some(device_id.into());
        self
    }

    /// Delivers commands over HTTP while the pub/sub session is down.
    #[cfg(feature = "http")]
    #[must_use]
    pub fn http_fallback(mut self, fallback: HttpFallback) -> Self {
        self.http = Some(fallback);
        self
    }

    /// Builds the client.
    ///
    /// A missing transport is not an error here; [`ClockClient::connect`]
    /// reports it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Value` if the initial device identifier is empty.
    pub fn build(self) -> Result<ClockClient<T>> {
        let device = match self.device {
            Some(id) => {
                let id = id.trim().to_string();
                let topics = TopicSet::derive(&self.config.topic_prefix, &id)?;
                Some(ActiveDevice { id, topics })
            }
            None => None,
        };

        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(generate_client_id);
        let storage: Arc<dyn KeyValueStore> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(MemoryStore::new()),
        };
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Shared {
            transport: self.transport,
            config: self.config,
            reconnection: self.reconnection,
            queue: Mutex::new(OfflineQueue::new(self.queue.capacity)),
            queue_config: self.queue,
            client_id,
            #[cfg(feature = "http")]
            http: self.http,
            tokens: TokenStore::new(storage),
            router: EventRouter::new(),
            registry: DeviceRegistry::new(),
            device: RwLock::new(device),
            session: RwLock::new(None),
            state,
            transition: tokio::sync::Mutex::new(()),
            supervisor: Mutex::new(None),
            subscriptions: RwLock::new(Vec::new()),
            extra_topics: RwLock::new(Vec::new()),
            pending_auth: Mutex::new(HashMap::new()),
            last_activity: Mutex::new(Instant::now()),
            attempts: AtomicU32::new(0),
            stats: Mutex::new(SendStats::default()),
        };

        let shared = Arc::new(shared);
        Ok(ClockClient {
            owner: Arc::new(Owner {
                shared: Arc::downgrade(&shared),
            }),
            shared,
        })
    }
}

impl<T: Transport> Default for ClockClientBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds of a duration, saturating, for log fields.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn generate_client_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("smartclock_{suffix}")
}
