// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP transport shared by the Gen1 and Gen2+ clients.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};

use crate::error::ProtocolError;
use crate::protocol::DeviceResponse;

// ============================================================================
// HttpConfig - Connection parameters for one device
// ============================================================================

/// Configuration for reaching a device over HTTP.
///
/// HTTP is stateless: every call is an independent request, so the
/// configuration is all a client needs.
///
/// # Examples
///
/// ```
/// use shelly_onboard::protocol::HttpConfig;
/// use std::time::Duration;
///
/// // Simple configuration
/// let config = HttpConfig::new("192.168.1.100");
///
/// // With all options
/// let config = HttpConfig::new("192.168.1.100")
///     .with_port(8080)
///     .with_credentials("admin", "password")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(config.base_url(), "http://192.168.1.100:8080");
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl HttpConfig {
    /// Default HTTP port.
    pub const DEFAULT_PORT: u16 = 80;
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new HTTP configuration for the specified host.
    ///
    /// The host may already carry a port (`192.168.1.5:8080`); it is then
    /// used as-is.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            credentials: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets a custom port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets authentication credentials.
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
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the credentials if set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builds the base URL from this configuration.
    #[must_use]
    pub fn base_url(&self) -> String {
        let host = self
            .host
            .trim_start_matches("http://")
            .trim_end_matches('/');
        if self.port == Self::DEFAULT_PORT || host.contains(':') {
            format!("http://{host}")
        } else {
            format!("http://{host}:{}", self.port)
        }
    }

    /// Creates an `HttpTransport` from this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the host is empty or the HTTP client cannot be created.
    pub fn into_transport(self) -> Result<HttpTransport, ProtocolError> {
        if self.host.trim().is_empty() {
            return Err(ProtocolError::InvalidAddress("host is required".to_string()));
        }

        let base_url = self.base_url();

        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ProtocolError::Http)?;

        Ok(HttpTransport {
            base_url,
            client,
            credentials: self.credentials,
            timeout: self.timeout,
        })
    }
}

/// Query parameters whose values never appear in logs or errors.
const SECRET_PARAMS: [&str; 3] = ["key", "pass", "password"];

// ============================================================================
// HttpTransport - Request execution
// ============================================================================

/// HTTP transport for one device.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl HttpTransport {
    /// Returns the base URL of the device.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the URL for a path and query parameters.
    fn build_url(&self, path: &str, params: &[(&str, &str)]) -> String {
        self.render_url(path, params, |_, v| urlencoding::encode(v).into_owned())
    }

    /// Builds the URL for logging, with secret parameter values masked.
    fn loggable_url(&self, path: &str, params: &[(&str, &str)]) -> String {
        self.render_url(path, params, |k, v| {
            if SECRET_PARAMS.iter().any(|secret| *secret == k) {
                "***".to_string()
            } else {
                urlencoding::encode(v).into_owned()
            }
        })
    }

    fn render_url(
        &self,
        path: &str,
        params: &[(&str, &str)],
        value: impl Fn(&str, &str) -> String,
    ) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        if !params.is_empty() {
            let query: Vec<String> = params
                .iter()
                .map(|&(k, v)| format!("{}={}", urlencoding::encode(k), value(k, v)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }

        url
    }

    /// Sends `GET <path>?<params>`.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, timeout, authentication rejection
    /// or a non-success status code.
    pub async fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<DeviceResponse, ProtocolError> {
        tracing::debug!(url = %self.loggable_url(path, params), "Sending HTTP GET");
        let url = self.build_url(path, params);
        self.execute(self.client.get(&url)).await
    }

    /// Sends `POST <path>` with a JSON body.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<DeviceResponse, ProtocolError> {
        let url = self.build_url(path, &[]);
        tracing::debug!(url = %url, "Sending HTTP POST");
        self.execute(self.client.post(&url).json(body)).await
    }

    async fn execute(&self, request: RequestBuilder) -> Result<DeviceResponse, ProtocolError> {
        let request = match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        };

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProtocolError::AuthenticationFailed);
        }

        if !response.status().is_success() {
            return Err(ProtocolError::ConnectionFailed(format!(
                "HTTP {} - {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        tracing::debug!(body = %body, "Received HTTP response");

        Ok(DeviceResponse::new(body))
    }

    fn map_send_error(&self, error: reqwest::Error) -> ProtocolError {
        if error.is_timeout() {
            ProtocolError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
        } else {
            // The URL may carry credentials in its query.
            ProtocolError::Http(error.without_url())
        }
    }
}
