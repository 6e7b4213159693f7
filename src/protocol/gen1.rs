// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Gen1 (HTTP/REST) client.

use serde_json::Value;

use crate::error::Error;
use crate::protocol::{DeviceInfo, HttpConfig, HttpTransport};
use crate::types::WifiCredentials;

/// Client for Gen1 devices.
///
/// Gen1 devices expose one REST endpoint per resource; every call is a
/// `GET` with query parameters.
///
/// # Examples
///
/// ```no_run
/// use shelly_onboard::protocol::{Gen1Client, HttpConfig};
///
/// # async fn example() -> shelly_onboard::Result<()> {
/// let client = Gen1Client::new(HttpConfig::new("192.168.1.40"))?;
/// let status = client.status().await?;
/// println!("{status}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Gen1Client {
    transport: HttpTransport,
}

impl Gen1Client {
    /// Creates a client from an HTTP configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: HttpConfig) -> Result<Self, Error> {
        Ok(Self {
            transport: config.into_transport()?,
        })
    }

    /// Returns the base URL of the device.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Calls an arbitrary endpoint and returns the parsed JSON body.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a non-JSON body.
    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, Error> {
        let response = self.transport.get(path, params).await?;
        Ok(response.json()?)
    }

    /// Returns the device identity (`/shelly`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or parse failure.
    pub async fn info(&self) -> Result<DeviceInfo, Error> {
        let response = self.transport.get("shelly", &[]).await?;
        Ok(DeviceInfo::from_response(&response)?)
    }

    /// Returns the full device configuration (`/settings`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or parse failure.
    pub async fn settings(&self) -> Result<Value, Error> {
        self.get("settings", &[]).await
    }

    /// Returns the full device status (`/status`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or parse failure.
    pub async fn status(&self) -> Result<Value, Error> {
        self.get("status", &[]).await
    }

    /// Configures and enables the WiFi station interface.
    ///
    /// The device joins the network shortly after answering, which drops any
    /// client connected to its own access point.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure.
    pub async fn set_wifi_station(&self, credentials: &WifiCredentials) -> Result<Value, Error> {
        let mut params = vec![("enabled", "1"), ("ssid", credentials.ssid())];
        if let Some(password) = credentials.password() {
            params.push(("key", password));
        }
        self.get("settings/sta", &params).await
    }

    /// Enables or disables the cloud connection.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure.
    pub async fn set_cloud_enabled(&self, enabled: bool) -> Result<Value, Error> {
        let flag = if enabled { "1" } else { "0" };
        self.get("settings/cloud", &[("enabled", flag)]).await
    }
}
