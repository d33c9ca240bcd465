// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device-scoped topic derivation.
//!
//! Every SmartClock listens on a fixed set of channels below
//! `<prefix>/<device_key>/`:
//!
//! ```text
//! smartclock/kitchen_clock/command         ← commands to the clock
//! smartclock/kitchen_clock/status          → presence and status (retained)
//! smartclock/kitchen_clock/alarm           → alarm events
//! smartclock/kitchen_clock/sensors         → sensor readings
//! smartclock/kitchen_clock/auth            ← authentication requests
//! smartclock/kitchen_clock/auth/response/<requestId>
//! smartclock/kitchen_clock/test            ↔ diagnostics
//! ```

use std::fmt;

use crate::error::ValueError;

/// Default topic prefix used by the SmartClock firmware.
pub const DEFAULT_TOPIC_PREFIX: &str = "smartclock";

/// Placeholder in the auth response template replaced by the request id.
pub const REQUEST_ID_PLACEHOLDER: &str = "{requestId}";

/// Normalized form of a device identifier used in topic names.
///
/// Lower-cased, with every character that is not ASCII alphanumeric
/// replaced by `_`. Distinct identifiers may share a key.
///
/// # Examples
///
/// ```
/// use smartclock_lib::protocol::DeviceKey;
///
/// let key = DeviceKey::new("Kitchen Clock").unwrap();
/// assert_eq!(key.as_str(), "kitchen_clock");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey(String);

impl DeviceKey {
    /// Normalizes a raw device identifier.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::EmptyDeviceId` if the identifier is empty after
    /// trimming.
    pub fn new(device_id: &str) -> Result<Self, ValueError> {
        let trimmed = device_id.trim();
        if trimmed.is_empty() {
            return Err(ValueError::EmptyDeviceId);
        }

        let key = trimmed
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The channels of a single device.
///
/// A `TopicSet` is a value: switching devices derives a new one instead of
/// mutating the current set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    key: DeviceKey,
    command: String,
    status: String,
    alarm: String,
    sensors: String,
    auth: String,
    auth_response_template: String,
    test: String,
}

impl TopicSet {
    /// Derives the topic set for a device identifier.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::EmptyDeviceId` for empty or whitespace-only
    /// identifiers.
    ///
    /// # Examples
    ///
    /// ```
    /// use smartclock_lib::protocol::TopicSet;
    ///
    /// let topics = TopicSet::derive("smartclock", "Kitchen Clock").unwrap();
    /// assert_eq!(topics.command(), "smartclock/kitchen_clock/command");
    /// assert_eq!(
    ///     topics.auth_response("abc"),
    ///     "smartclock/kitchen_clock/auth/response/abc"
    /// );
    /// ```
    pub fn derive(prefix: &str, device_id: &str) -> Result<Self, ValueError> {
        let key = DeviceKey::new(device_id)?;
        let base = format!("{}/{key}", prefix.trim_end_matches('/'));

        Ok(Self {
            command: format!("{base}/command"),
            status: format!("{base}/status"),
            alarm: format!("{base}/alarm"),
            sensors: format!("{base}/sensors"),
            auth: format!("{base}/auth"),
            auth_response_template: format!("{base}/auth/response/{REQUEST_ID_PLACEHOLDER}"),
            test: format!("{base}/test"),
            key,
        })
    }

    /// Returns the normalized device key.
    #[must_use]
    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    /// Topic commands are published to.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Retained presence/status topic.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Alarm event topic.
    #[must_use]
    pub fn alarm(&self) -> &str {
        &self.alarm
    }

    /// Sensor reading topic.
    #[must_use]
    pub fn sensors(&self) -> &str {
        &self.sensors
    }

    /// Authentication request topic.
    #[must_use]
    pub fn auth(&self) -> &str {
        &self.auth
    }

    /// Unresolved auth response template containing [`REQUEST_ID_PLACEHOLDER`].
    #[must_use]
    pub fn auth_response_template(&self) -> &str {
        &self.auth_response_template
    }

    /// Diagnostics topic.
    #[must_use]
    pub fn test(&self) -> &str {
        &self.test
    }

    /// Resolves the auth response template for one request.
    #[must_use]
    pub fn auth_response(&self, request_id: &str) -> String {
        self.auth_response_template
            .replace(REQUEST_ID_PLACEHOLDER, request_id)
    }

    /// Topics the client keeps subscribed while this device is active.
    #[must_use]
    pub fn subscriptions(&self) -> [&str; 4] {
        [&self.status, &self.alarm, &self.sensors, &self.test]
    }
}

/// Returns `true` if `topic` matches the MQTT topic `filter`.
///
/// Supports the `+` (single level) and `#` (remaining levels) wildcards.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
