// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clock command definitions.
//!
//! A command is a name plus a JSON `data` object. The client wraps it in an
//! envelope (adding the auth block and a timestamp) before publishing it on
//! the device's command topic.
//!
//! # Available Commands
//!
//! | Command | Name | Data |
//! |---------|------|------|
//! | [`ClockCommand::SetAlarm`] | `set_alarm` | `{hour, minute, sound, enable, label}` |
//! | [`ClockCommand::StopAlarm`] | `stop_alarm` | `{}` |
//! | [`ClockCommand::Snooze`] | `snooze` | `{}` |
//! | [`ClockCommand::PressButton`] | `button_press` | `{button}` |
//! | [`ClockCommand::SetBrightness`] | `set_brightness` | `{brightness}` |
//! | [`ClockCommand::SetTimezone`] | `set_timezone` | `{timezone}` |
//! | [`ClockCommand::SyncTime`] | `sync_time` | `{epoch}` |
//! | [`ClockCommand::GetStatus`] | `get_status` | `{}` |
//! | [`ClockCommand::Reset`] | `reset` | `{}` |
//!
//! # Examples
//!
//! ```
//! use smartclock_lib::command::{ClockCommand, Command};
//! use smartclock_lib::types::Button;
//!
//! let cmd = ClockCommand::PressButton(Button::new(3).unwrap());
//! assert_eq!(cmd.name(), "button_press");
//! assert_eq!(cmd.data(), serde_json::json!({"button": 3}));
//! ```

use serde_json::{Map, Value, json};

use crate::error::ValueError;
use crate::types::{Alarm, Brightness, Button};

/// A command that can be sent to a clock.
pub trait Command {
    /// Returns the command name.
    fn name(&self) -> &str;

    /// Returns the command data object.
    fn data(&self) -> Value;
}

/// The commands the clock firmware understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockCommand {
    /// Program the alarm.
    SetAlarm(Alarm),
    /// Silence a ringing alarm.
    StopAlarm,
    /// Snooze a ringing alarm.
    Snooze,
    /// Simulate a front-panel button press.
    PressButton(Button),
    /// Set display brightness.
    SetBrightness(Brightness),
    /// Set the IANA timezone name.
    SetTimezone(String),
    /// Set the clock to a Unix time in seconds.
    SyncTime(i64),
    /// Ask the clock to publish its status.
    GetStatus,
    /// Reboot the clock.
    Reset,
}

impl ClockCommand {
    /// Creates a timezone command.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::EmptyTimezone` for a blank name.
    pub fn set_timezone(timezone: impl Into<String>) -> Result<Self, ValueError> {
        let timezone = timezone.into();
        let timezone = timezone.trim();
        if timezone.is_empty() {
            return Err(ValueError::EmptyTimezone);
        }
        Ok(Self::SetTimezone(timezone.to_string()))
    }

    /// Creates a time sync command for the current system time.
    #[must_use]
    pub fn sync_now() -> Self {
        Self::SyncTime(chrono::Utc::now().timestamp())
    }
}

impl Command for ClockCommand {
    fn name(&self) -> &str {
        match self {
            Self::SetAlarm(_) => "set_alarm",
            Self::StopAlarm => "stop_alarm",
            Self::Snooze => "snooze",
            Self::PressButton(_) => "button_press",
            Self::SetBrightness(_) => "set_brightness",
            Self::SetTimezone(_) => "set_timezone",
            Self::SyncTime(_) => "sync_time",
            Self::GetStatus => "get_status",
            Self::Reset => "reset",
        }
    }

    fn data(&self) -> Value {
        match self {
            Self::SetAlarm(alarm) => alarm.to_data(),
            Self::PressButton(button) => json!({ "button": button.number() }),
            Self::SetBrightness(level) => json!({ "brightness": level.value() }),
            Self::SetTimezone(timezone) => json!({ "timezone": timezone }),
            Self::SyncTime(epoch) => json!({ "epoch": epoch }),
            Self::StopAlarm | Self::Snooze | Self::GetStatus | Self::Reset => {
                Value::Object(Map::new())
            }
        }
    }
}
