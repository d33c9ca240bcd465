// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client configuration.

use std::time::Duration;

use crate::protocol::DEFAULT_TOPIC_PREFIX;

/// Connection and protocol settings for a [`ClockClient`](crate::ClockClient).
///
/// Usually filled in through
/// [`ClockClientBuilder`](crate::ClockClientBuilder); the struct is public
/// so a complete configuration can be loaded and passed at once.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use smartclock_lib::ClientConfig;
///
/// let config = ClientConfig::new("mqtt://192.168.1.50:1883")
///     .with_auth_timeout(Duration::from_secs(5))
///     .with_require_auth(true);
///
/// assert_eq!(config.topic_prefix, "smartclock");
/// assert!(config.require_auth);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Broker URL (e.g. `mqtt://192.168.1.50:1883`).
    pub broker_url: String,
    /// First topic level of every device topic.
    pub topic_prefix: String,
    /// Client identifier; a random `smartclock_xxxxxxxx` id when `None`.
    pub client_id: Option<String>,
    /// Optional (username, password) for the broker.
    pub credentials: Option<(String, String)>,
    /// Keep-alive interval requested from the broker.
    pub keep_alive: Duration,
    /// Deadline for establishing a session.
    pub connect_timeout: Duration,
    /// Deadline for an authentication round-trip.
    pub auth_timeout: Duration,
    /// Health-check period; a session silent for twice this long is
    /// considered stale. Zero disables the check.
    pub health_check_interval: Duration,
    /// Refuse commands for devices without a valid token.
    pub require_auth: bool,
    /// Token lifetime used when the device does not announce one.
    pub token_lifetime: Duration,
    /// Ask the broker to discard previous session state.
    pub clean_session: bool,
}

impl ClientConfig {
    /// Default broker URL.
    pub const DEFAULT_BROKER_URL: &'static str = "mqtt://localhost:1883";

    /// Creates a configuration for the given broker with default settings.
    #[must_use]
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Self::default()
        }
    }

    /// Sets the topic prefix.
    #[must_use]
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Sets the client identifier.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets broker credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the connect deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the authentication deadline.
    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the health-check period.
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Requires a valid token for every command.
    #[must_use]
    pub fn with_require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    /// Sets the fallback token lifetime.
    #[must_use]
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Sets the clean-session flag.
    #[must_use]
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: Self::DEFAULT_BROKER_URL.to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            client_id: None,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            require_auth: false,
            token_lifetime: Duration::from_secs(24 * 60 * 60),
            clean_session: true,
        }
    }
}

/// Configuration for automatic reconnection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use smartclock_lib::ReconnectionPolicy;
///
/// // Default policy (enabled with exponential backoff)
/// let policy = ReconnectionPolicy::default();
///
/// // Disable reconnection
/// let policy = ReconnectionPolicy::disabled();
///
/// // Custom policy
/// let policy = ReconnectionPolicy::new()
///     .with_max_attempts(5)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Whether automatic reconnection is enabled.
    pub enabled: bool,
    /// Maximum number of attempts before giving up (None = infinite).
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f32,
}

impl ReconnectionPolicy {
    /// Creates a new reconnection policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled reconnection policy.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retries forever.
    #[must_use]
    pub fn with_infinite_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Sets the delay before the first attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between attempts.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before attempt number `attempt` (0-based):
    /// `initial * multiplier^attempt`, capped at the maximum delay.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let multiplier = self
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        // Delays are seconds to minutes, far from f32 precision limits
        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f32 * multiplier;

        if !delay_ms.is_finite() {
            return self.max_delay;
        }

        // Saturating float-to-int cast; negative values become zero
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }

    /// Returns true if another attempt should be made after `attempt`
    /// failed ones.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(10),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
