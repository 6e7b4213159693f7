// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device transport clients for both protocol generations.
//!
//! # Clients
//!
//! - [`Gen1Client`]: REST endpoints over HTTP `GET`
//! - [`Gen2Client`]: JSON-RPC over HTTP `POST /rpc`
//! - [`Connection`]: a tagged union of the two, opened by the
//!   [`ProtocolRouter`](crate::router::ProtocolRouter)
//!
//! [`probe`] tells the two dialects apart with a single unauthenticated
//! request.

mod connection;
mod gen1;
mod gen2;
mod http;
mod info;

pub use connection::Connection;
pub use gen1::Gen1Client;
pub use gen2::{Gen2Client, wifi_station_params};
pub use http::{HttpConfig, HttpTransport};
pub use info::{DeviceInfo, probe};

/// Raw response body from a device.
#[derive(Debug, Clone)]
pub struct DeviceResponse {
    /// The raw JSON response body.
    body: String,
}

impl DeviceResponse {
    /// Creates a new response with the given body.
    #[must_use]
    pub fn new(body: String) -> Self {
        Self { body }
    }

    /// Returns the raw response body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parses the response as a specific type.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON cannot be parsed into the target type.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::error::ParseError> {
        serde_json::from_str(&self.body).map_err(Into::into)
    }

    /// Parses the response as an untyped JSON value.
    ///
    /// # Errors
    ///
    /// Returns error if the body is not valid JSON.
    pub fn json(&self) -> Result<serde_json::Value, crate::error::ParseError> {
        self.parse()
    }
}
