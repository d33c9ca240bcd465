// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Password/token round-trip with the active device.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::ClockClient;
use crate::auth::SessionToken;
use crate::error::{Error, Result, ValueError};
use crate::event::ClientEvent;
use crate::protocol::{AuthRequest, AuthResponse};
use crate::transport::{PublishOptions, QoS, Transport, TransportSession};

impl<T: Transport> ClockClient<T> {
    /// Authenticates against the active device.
    ///
    /// Publishes an `auth_request` carrying a fresh request id and waits for
    /// the device's answer on `auth/response/<requestId>`. An accepted
    /// password yields a token that is stored and attached to every later
    /// command. A rejection, a malformed answer, a timeout or a request that
    /// cannot be sent clears any stored token for the device.
    ///
    /// # Errors
    ///
    /// - `Error::Value` for an empty password
    /// - `Error::Configuration` without an active device
    /// - `Error::NotConnected` without a session, or if the session is lost
    ///   while waiting
    /// - `Error::Subscribe` or `Error::Publish` if the request cannot be sent
    /// - `Error::AuthenticationFailed` if the device rejects the password
    /// - `Error::Timeout` if no answer arrives within the auth timeout
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn example(client: smartclock_lib::ClockClient<smartclock_lib::transport::MqttTransport>) -> smartclock_lib::Result<()> {
    /// let token = client.authenticate("clock-password").await?;
    /// println!("token valid until {}", token.expires_at);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn authenticate(&self, password: &str) -> Result<SessionToken> {
        if password.is_empty() {
            return Err(ValueError::EmptyPassword.into());
        }
        let shared = &self.shared;
        let device = shared.require_device()?;
        let session = shared.current_session().ok_or(Error::NotConnected)?;

        let request_id = Uuid::new_v4().to_string();
        let response_topic = device.topics.auth_response(&request_id);

        let (tx, rx) = oneshot::channel();
        shared
            .pending_auth
            .lock()
            .insert(response_topic.clone(), tx);

        let request = AuthRequest::new(&device.id, password, &shared.client_id, &request_id);
        tracing::debug!(device = %device.id, request_id = %request_id, "Authenticating");

        let outcome: Result<_> = async {
            session
                .subscribe(&response_topic, QoS::AtLeastOnce)
                .await
                .map_err(|source| Error::Subscribe {
                    topic: response_topic.clone(),
                    source,
                })?;
            shared.touch();

            let payload = serde_json::to_vec(&request)?;
            session
                .publish(device.topics.auth(), payload, PublishOptions::default())
                .await
                .map_err(|source| Error::Publish {
                    topic: device.topics.auth().to_string(),
                    source,
                })?;
            shared.touch();

            Ok(tokio::time::timeout(shared.config.auth_timeout, rx).await)
        }
        .await;

        shared.pending_auth.lock().remove(&response_topic);
        match session.unsubscribe(&response_topic).await {
            Ok(()) => shared.touch(),
            Err(e) => tracing::debug!(topic = %response_topic, error = %e, "Unsubscribe failed"),
        }

        let waited = match outcome {
            Ok(waited) => waited,
            Err(e) => {
                self.reject(&device.id, &e.to_string());
                return Err(e);
            }
        };

        let response = match waited {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                tracing::debug!(device = %device.id, "Session lost during authentication");
                return Err(Error::NotConnected);
            }
            Err(_) => {
                let timeout = shared.config.auth_timeout;
                self.reject(&device.id, "authentication timed out");
                return Err(Error::timeout("authentication", timeout));
            }
        };

        let token = match response {
            AuthResponse {
                success: true,
                token: Some(token),
                expiry,
                ..
            } if !token.is_empty() => (token, expiry),
            AuthResponse { success: true, .. } => {
                let reason = "malformed authentication response: missing token";
                self.reject(&device.id, reason);
                return Err(Error::AuthenticationFailed(reason.to_string()));
            }
            AuthResponse { message, .. } => {
                let reason = message.unwrap_or_else(|| "rejected".to_string());
                self.reject(&device.id, &reason);
                return Err(Error::AuthenticationFailed(reason));
            }
        };

        let (token, expiry) = token;
        let expires_at = self.token_expiry(expiry);
        shared.tokens.save(&device.id, &token, expires_at);

        tracing::info!(device = %device.id, expires_at = %expires_at, "Authenticated");
        shared.emit(ClientEvent::AuthSucceeded {
            device_id: device.id.clone(),
            expires_at,
        });

        Ok(SessionToken {
            device_id: device.id,
            token,
            expires_at,
        })
    }

    /// Forgets the active device's token.
    pub fn logout(&self) {
        if let Some(device) = self.active_device() {
            self.shared.tokens.clear(&device);
            tracing::debug!(device = %device, "Token cleared");
        }
    }

    fn reject(&self, device_id: &str, reason: &str) {
        self.shared.tokens.clear(device_id);
        tracing::warn!(device = %device_id, reason = %reason, "Authentication failed");
        self.shared.emit(ClientEvent::AuthFailed {
            device_id: device_id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Expiry from the device's lifetime in milliseconds, or the configured
    /// default when absent.
    fn token_expiry(&self, expiry_ms: Option<i64>) -> DateTime<Utc> {
        let lifetime = expiry_ms
            .filter(|ms| *ms > 0)
            .and_then(TimeDelta::try_milliseconds)
            .or_else(|| TimeDelta::from_std(self.shared.config.token_lifetime).ok())
            .unwrap_or(TimeDelta::MAX);

        Utc::now()
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
