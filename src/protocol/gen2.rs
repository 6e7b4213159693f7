// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Gen2+ (JSON-RPC over HTTP) client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Error, ParseError, ProtocolError};
use crate::protocol::{DeviceInfo, HttpConfig, HttpTransport};
use crate::types::WifiCredentials;

/// Source identifier sent with every RPC request.
const RPC_SOURCE: &str = "shelly_onboard";

/// Client for Gen2 and newer devices.
///
/// All operations are JSON-RPC 2.0 style calls posted to `/rpc`.
///
/// # Examples
///
/// ```no_run
/// use shelly_onboard::protocol::{Gen2Client, HttpConfig};
/// use serde_json::json;
///
/// # async fn example() -> shelly_onboard::Result<()> {
/// let client = Gen2Client::new(HttpConfig::new("192.168.1.41"))?;
/// let result = client.call("Switch.GetStatus", json!({"id": 0})).await?;
/// println!("{result}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Gen2Client {
    transport: HttpTransport,
    next_id: Arc<AtomicU64>,
}

/// Envelope of an RPC reply.
#[derive(Debug, Deserialize)]
struct RpcReply {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl Gen2Client {
    /// Creates a client from an HTTP configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: HttpConfig) -> Result<Self, Error> {
        Ok(Self {
            transport: config.into_transport()?,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Returns the base URL of the device.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Calls an RPC method and returns its `result` object.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Rpc`] if the device answers with an error
    /// object, or a transport/parse error.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "id": id,
            "src": RPC_SOURCE,
            "method": method,
            "params": params,
        });

        tracing::debug!(method = %method, id, "Calling RPC method");

        let response = self.transport.post_json("rpc", &request).await?;
        let reply: RpcReply = response.parse()?;

        if let Some(error) = reply.error {
            return Err(ProtocolError::Rpc {
                code: error.code,
                message: error.message,
            }
            .into());
        }

        reply
            .result
            .ok_or_else(|| ParseError::MissingField("result".to_string()).into())
    }

    /// Returns the device identity (`Shelly.GetDeviceInfo`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or parse failure.
    pub async fn info(&self) -> Result<DeviceInfo, Error> {
        let value = self.call("Shelly.GetDeviceInfo", json!({})).await?;
        Ok(DeviceInfo::from_value(value)?)
    }

    /// Returns the full configuration (`Shelly.GetConfig`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or RPC failure.
    pub async fn get_config(&self) -> Result<Value, Error> {
        self.call("Shelly.GetConfig", json!({})).await
    }

    /// Returns the full status (`Shelly.GetStatus`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or RPC failure.
    pub async fn get_status(&self) -> Result<Value, Error> {
        self.call("Shelly.GetStatus", json!({})).await
    }

    /// Configures and enables the WiFi station interface (`WiFi.SetConfig`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or RPC failure.
    pub async fn set_wifi_station(&self, credentials: &WifiCredentials) -> Result<Value, Error> {
        self.call("WiFi.SetConfig", wifi_station_params(credentials))
            .await
    }

    /// Enables or disables the cloud connection (`Cloud.SetConfig`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or RPC failure.
    pub async fn set_cloud_enabled(&self, enabled: bool) -> Result<Value, Error> {
        self.call("Cloud.SetConfig", json!({"config": {"enable": enabled}}))
            .await
    }

    /// Enables or disables the Bluetooth radio (`BLE.SetConfig`).
    ///
    /// # Errors
    ///
    /// Returns error on transport or RPC failure.
    pub async fn set_ble_enabled(&self, enabled: bool) -> Result<Value, Error> {
        self.call("BLE.SetConfig", json!({"config": {"enable": enabled}}))
            .await
    }
}

/// Builds `WiFi.SetConfig` parameters enabling the station interface.
///
/// Shared with the BLE transport, which carries the same RPC frames over GATT.
#[must_use]
pub fn wifi_station_params(credentials: &WifiCredentials) -> Value {
    json!({
        "config": {
            "sta": {
                "ssid": credentials.ssid(),
                "pass": credentials.password(),
                "enable": true,
            }
        }
    })
}
