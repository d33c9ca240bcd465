// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Front-panel buttons.

use std::fmt;

use crate::error::ValueError;

/// One of the clock's four physical buttons (1-4).
///
/// # Examples
///
/// ```
/// use smartclock_lib::types::Button;
///
/// let button = Button::new(2).unwrap();
/// assert_eq!(button.number(), 2);
///
/// assert!(Button::new(0).is_err());
/// assert!(Button::new(5).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Button(u8);

impl Button {
    /// Number of buttons on the device.
    pub const COUNT: u8 = 4;

    /// Creates a button reference.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` unless `number` is 1-4.
    pub fn new(number: u8) -> Result<Self, ValueError> {
        if !(1..=Self::COUNT).contains(&number) {
            return Err(ValueError::OutOfRange {
                field: "button",
                min: 1,
                max: i64::from(Self::COUNT),
                actual: i64::from(number),
            });
        }
        Ok(Self(number))
    }

    /// Returns the 1-based button number.
    #[must_use]
    pub const fn number(&self) -> u8 {
        self.0
    }

    /// Iterates over every button.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=Self::COUNT).map(Self)
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "button {}", self.0)
    }
}

impl TryFrom<u8> for Button {
    type Error = ValueError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
