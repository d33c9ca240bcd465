// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SmartClock wire protocol.
//!
//! - [`TopicSet`]: the per-device channel names
//! - [`Payload`]: JSON-first payload codec
//! - Envelopes: [`CommandEnvelope`], [`PresenceEnvelope`], [`AuthRequest`],
//!   [`AuthResponse`]

mod codec;
mod envelope;
mod topics;

pub use codec::Payload;
pub use envelope::{
    AuthRequest, AuthResponse, CommandAuth, CommandEnvelope, PresenceEnvelope, PresenceStatus,
    now_millis,
};
pub use topics::{
    DEFAULT_TOPIC_PREFIX, DeviceKey, REQUEST_ID_PLACEHOLDER, TopicSet, topic_matches,
};
