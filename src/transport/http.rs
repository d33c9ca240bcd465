// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request/response fallback for commands.
//!
//! When the pub/sub session is down, commands can still be delivered to a
//! clock (or a gateway in front of it) with one HTTP request each:
//!
//! ```text
//! POST {base_url}/api/devices/{device_id}/command
//! Content-Type: application/json
//!
//! { "command": "snooze", "data": {}, "timestamp": 1700000000000 }
//! ```

use std::time::Duration;

use reqwest::Client;

use crate::error::TransportError;
use crate::protocol::CommandEnvelope;

/// HTTP command delivery used while the pub/sub session is unavailable.
///
/// # Examples
///
/// ```no_run
/// use smartclock_lib::transport::HttpFallback;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), smartclock_lib::error::TransportError> {
/// let fallback = HttpFallback::new("http://192.168.1.60")?
///     .with_credentials("admin", "secret")
///     .with_timeout(Duration::from_secs(5))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFallback {
    base_url: String,
    client: Client,
    credentials: Option<(String, String)>,
}

impl HttpFallback {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a fallback posting to the given base URL.
    ///
    /// A URL without scheme gets `http://`.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let base_url = base_url.into();
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(TransportError::InvalidAddress(
                "HTTP fallback URL is required".to_string(),
            ));
        }

        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("http://{base_url}")
        };

        Ok(Self {
            base_url,
            client: build_client(Self::DEFAULT_TIMEOUT)?,
            credentials: None,
        })
    }

    /// Sets HTTP basic authentication credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the request timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, TransportError> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the command URL for a device.
    fn command_url(&self, device_id: &str) -> String {
        format!(
            "{}/api/devices/{}/command",
            self.base_url,
            urlencoding::encode(device_id)
        )
    }

    /// Delivers a command envelope.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the request fails and
    /// `TransportError::Rejected` for a non-success status.
    pub async fn send_command(
        &self,
        device_id: &str,
        envelope: &CommandEnvelope,
    ) -> Result<(), TransportError> {
        let url = self.command_url(device_id);

        tracing::debug!(url = %url, command = %envelope.command, "Sending command over HTTP");

        let mut request = self.client.post(&url).json(envelope);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(TransportError::Rejected(format!(
                "HTTP {} - {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        Ok(())
    }
}

fn build_client(timeout: Duration) -> Result<Client, TransportError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(TransportError::Http)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_scheme_and_strips_slash() {
        let fallback = HttpFallback::new("192.168.1.60/").unwrap();
        assert_eq!(fallback.base_url(), "http://192.168.1.60");

        let fallback = HttpFallback::new("https://clock.local").unwrap();
        assert_eq!(fallback.base_url(), "https://clock.local");
    }

    #[test]
    fn rejects_empty_url() {
        assert!(matches!(
            HttpFallback::new("  "),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn command_url_encodes_device() {
        let fallback = HttpFallback::new("http://gw").unwrap();
        assert_eq!(
            fallback.command_url("Kitchen Clock"),
            "http://gw/api/devices/Kitchen%20Clock/command"
        );
    }
}
