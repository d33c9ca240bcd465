// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Devices observed on the bus.
//!
//! Any inbound JSON object naming a device (`deviceId`, `device_id` or
//! `device`) creates or refreshes that device's record. Records are never
//! expired.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::protocol::Payload;

/// Fields that may carry the device identifier, in lookup order.
const DEVICE_ID_FIELDS: [&str; 3] = ["deviceId", "device_id", "device"];

/// What is known about one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    /// Device identifier as it appeared on the bus.
    pub device_id: String,
    /// First message referencing the device.
    pub first_seen: DateTime<Utc>,
    /// Latest message referencing the device.
    pub last_seen: DateTime<Utc>,
    /// Latest `status` field, if any message carried one.
    pub status: Option<String>,
    /// Every field ever reported, later values winning.
    pub last_payload: Map<String, Value>,
    /// Number of messages observed.
    pub message_count: u64,
}

impl DeviceRecord {
    /// Returns `true` if the latest reported status is `online`.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status.as_deref() == Some("online")
    }
}

/// Thread-safe registry of observed devices.
///
/// # Examples
///
/// ```
/// use smartclock_lib::protocol::Payload;
/// use smartclock_lib::registry::DeviceRegistry;
///
/// let registry = DeviceRegistry::new();
/// let payload = Payload::decode(br#"{"deviceId":"Kitchen Clock","status":"online"}"#);
///
/// assert_eq!(registry.observe(&payload), Some(("Kitchen Clock".to_string(), true)));
/// assert!(registry.get("Kitchen Clock").unwrap().is_online());
/// ```
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a payload if it names a device.
    ///
    /// Returns the device identifier and whether the device is new.
    pub fn observe(&self, payload: &Payload) -> Option<(String, bool)> {
        self.observe_at(payload, Utc::now())
    }

    /// Like [`observe`](Self::observe) with an explicit timestamp.
    pub fn observe_at(&self, payload: &Payload, now: DateTime<Utc>) -> Option<(String, bool)> {
        let object = payload.as_json()?.as_object()?;
        let device_id = device_id_of(object)?;

        let mut devices = self.devices.write();
        let is_new = !devices.contains_key(&device_id);
        let record = devices
            .entry(device_id.clone())
            .or_insert_with(|| DeviceRecord {
                device_id: device_id.clone(),
                first_seen: now,
                last_seen: now,
                status: None,
                last_payload: Map::new(),
                message_count: 0,
            });

        record.last_seen = now;
        record.message_count += 1;
        if let Some(status) = object.get("status").and_then(Value::as_str) {
            record.status = Some(status.to_string());
        }
        for (key, value) in object {
            record.last_payload.insert(key.clone(), value.clone());
        }

        if is_new {
            tracing::debug!(device = %device_id, "New device observed");
        }
        Some((device_id, is_new))
    }

    /// Returns a device's record.
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.read().get(device_id).cloned()
    }

    /// Lists every device, most recently seen first.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        devices
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns `true` if no device was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

fn device_id_of(object: &Map<String, Value>) -> Option<String> {
    DEVICE_ID_FIELDS.iter().find_map(|field| {
        object
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    })
}
