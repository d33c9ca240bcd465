// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for clock control.
//!
//! Each type checks its range at construction time, so a command built from
//! them is always accepted by the firmware.
//!
//! # Types
//!
//! - [`Alarm`] - Alarm time (00:00-23:59), sound, enable flag and label
//! - [`Button`] - Front-panel button (1-4)
//! - [`Brightness`] - Display brightness (0-100%)

mod alarm;
mod brightness;
mod button;

pub use alarm::{Alarm, MAX_LABEL_LEN};
pub use brightness::Brightness;
pub use button::Button;
