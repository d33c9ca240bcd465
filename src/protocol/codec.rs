// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Payload encoding and decoding.
//!
//! Payloads are JSON whenever they parse as JSON and opaque text otherwise.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// A message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A payload that parsed as JSON.
    Json(Value),
    /// Anything else, kept as text.
    Text(String),
}

impl Payload {
    /// Decodes raw bytes, JSON first.
    ///
    /// Bytes that are not valid UTF-8 are decoded lossily.
    ///
    /// # Examples
    ///
    /// ```
    /// use smartclock_lib::protocol::Payload;
    ///
    /// assert!(Payload::decode(br#"{"a":1}"#).as_json().is_some());
    /// assert_eq!(Payload::decode(b"Online").as_text(), Some("Online"));
    /// ```
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            return Self::Json(value);
        }
        Self::Text(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Serializes a value into a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented as JSON.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::Json)
    }

    /// Encodes the payload for the wire.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Json(value) => value.to_string().into_bytes(),
            Self::Text(text) => text.clone().into_bytes(),
        }
    }

    /// Returns the JSON value, if any.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Returns the text, if the payload was not JSON.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Text(text) => Some(text),
        }
    }

    /// Deserializes a JSON payload into a typed value.
    #[must_use]
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.as_json()
            .and_then(|value| T::deserialize(value).ok())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}
