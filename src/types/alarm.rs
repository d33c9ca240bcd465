// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Alarm settings.

use std::fmt;

use serde_json::{Value, json};

use crate::error::ValueError;

/// Longest label the clock can display.
pub const MAX_LABEL_LEN: usize = 32;

/// A validated alarm.
///
/// # Examples
///
/// ```
/// use smartclock_lib::types::Alarm;
///
/// let alarm = Alarm::new(7, 30)?
///     .with_sound(2)
///     .with_label("Wake")?;
///
/// assert_eq!(alarm.to_string(), "07:30 Wake");
/// assert!(Alarm::new(24, 0).is_err());
/// # Ok::<(), smartclock_lib::error::ValueError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Alarm {
    hour: u8,
    minute: u8,
    sound: u8,
    enabled: bool,
    label: String,
}

impl Alarm {
    /// Creates an enabled alarm with the default sound and no label.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` for an hour above 23 or a minute
    /// above 59.
    pub fn new(hour: u8, minute: u8) -> Result<Self, ValueError> {
        if hour > 23 {
            return Err(ValueError::OutOfRange {
                field: "hour",
                min: 0,
                max: 23,
                actual: i64::from(hour),
            });
        }
        if minute > 59 {
            return Err(ValueError::OutOfRange {
                field: "minute",
                min: 0,
                max: 59,
                actual: i64::from(minute),
            });
        }

        Ok(Self {
            hour,
            minute,
            sound: 0,
            enabled: true,
            label: String::new(),
        })
    }

    /// Sets the sound index.
    #[must_use]
    pub fn with_sound(mut self, sound: u8) -> Self {
        self.sound = sound;
        self
    }

    /// Enables or disables the alarm.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the label.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::LabelTooLong` beyond 32 characters.
    pub fn with_label(mut self, label: impl Into<String>) -> Result<Self, ValueError> {
        let label = label.into();
        let len = label.chars().count();
        if len > MAX_LABEL_LEN {
            return Err(ValueError::LabelTooLong {
                max: MAX_LABEL_LEN,
                actual: len,
            });
        }
        self.label = label;
        Ok(self)
    }

    /// Hour (0-23).
    #[must_use]
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    /// Minute (0-59).
    #[must_use]
    pub const fn minute(&self) -> u8 {
        self.minute
    }

    /// Sound index.
    #[must_use]
    pub const fn sound(&self) -> u8 {
        self.sound
    }

    /// Whether the alarm is armed.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Label shown when the alarm rings.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Command data as the firmware expects it; `enable` is numeric.
    #[must_use]
    pub fn to_data(&self) -> Value {
        json!({
            "hour": self.hour,
            "minute": self.minute,
            "sound": self.sound,
            "enable": u8::from(self.enabled),
            "label": self.label,
        })
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)?;
        if !self.label.is_empty() {
            write!(f, " {}", self.label)?;
        }
        if !self.enabled {
            write!(f, " (off)")?;
        }
        Ok(())
    }
}
