// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session token persistence.
//!
//! Tokens are obtained through
//! [`ClockClient::authenticate`](crate::ClockClient::authenticate) and kept
//! in a [`TokenStore`] until they expire or authentication fails.

mod token_store;

pub use token_store::{LAST_DEVICE_KEY, SessionToken, TOKENS_KEY, TokenStore};
