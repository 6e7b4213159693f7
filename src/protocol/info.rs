// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity and generation probing.
//!
//! Every Shelly device, whatever its generation, answers `GET /shelly` without
//! authentication. Gen2+ devices include a numeric `gen` field; Gen1 devices
//! report a `type` field instead. This is the only request needed to tell the
//! two dialects apart.

use serde::Deserialize;

use crate::error::{Error, ParseError};
use crate::protocol::{DeviceResponse, HttpConfig};
use crate::types::{Generation, MacAddress};

/// Identity of a device as reported by the device itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device id (e.g. `shellyplus1-a8032ab12345`).
    pub id: String,
    /// MAC address, when reported.
    pub mac: Option<MacAddress>,
    /// Hardware model (`SNSW-001X16EU`) or Gen1 type (`SHSW-1`).
    pub model: String,
    /// Application / device type (`Plus1` on Gen2+, same as model on Gen1).
    pub device_type: Option<String>,
    /// Protocol generation.
    pub generation: Generation,
    /// Firmware version string.
    pub firmware: Option<String>,
    /// Whether the device requires authentication.
    pub auth_enabled: bool,
}

/// Raw `/shelly` (or `Shelly.GetDeviceInfo`) body covering both generations.
#[derive(Debug, Deserialize)]
struct ShellyIdentity {
    #[serde(rename = "gen")]
    generation: Option<u8>,
    id: Option<String>,
    mac: Option<String>,
    model: Option<String>,
    app: Option<String>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    fw: Option<String>,
    ver: Option<String>,
    auth: Option<bool>,
    auth_en: Option<bool>,
}

impl DeviceInfo {
    /// Parses a `/shelly` response body.
    ///
    /// # Errors
    ///
    /// Returns error if the body is not JSON or matches neither generation.
    pub fn from_response(response: &DeviceResponse) -> Result<Self, ParseError> {
        let identity: ShellyIdentity = response.parse()?;
        Self::from_identity(identity)
    }

    /// Parses a JSON value shaped like a `/shelly` response.
    ///
    /// # Errors
    ///
    /// Returns error if the value matches neither generation.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ParseError> {
        let identity: ShellyIdentity = serde_json::from_value(value)?;
        Self::from_identity(identity)
    }

    fn from_identity(identity: ShellyIdentity) -> Result<Self, ParseError> {
        let mac: Option<MacAddress> = identity.mac.as_deref().and_then(|m| m.parse().ok());

        match identity.generation {
            Some(generation) if generation >= 2 => {
                let model = identity
                    .model
                    .ok_or_else(|| ParseError::MissingField("model".to_string()))?;
                let id = identity
                    .id
                    .or_else(|| mac.map(|m| m.compact().to_lowercase()))
                    .unwrap_or_else(|| model.to_lowercase());
                Ok(Self {
                    id,
                    mac,
                    model,
                    device_type: identity.app,
                    generation: Generation::from(generation),
                    firmware: identity.ver.or(identity.fw),
                    auth_enabled: identity.auth_en.unwrap_or(false),
                })
            }
            _ => {
                let device_type = identity.device_type.ok_or_else(|| {
                    ParseError::UnexpectedFormat("neither `gen` nor `type` present".to_string())
                })?;
                let id = match mac {
                    Some(mac) => {
                        let compact = mac.compact();
                        format!(
                            "{}-{}",
                            device_type.to_lowercase(),
                            &compact[6..].to_lowercase()
                        )
                    }
                    None => device_type.to_lowercase(),
                };
                Ok(Self {
                    id,
                    mac,
                    model: device_type.clone(),
                    device_type: Some(device_type),
                    generation: Generation::Gen1,
                    firmware: identity.fw,
                    auth_enabled: identity.auth.unwrap_or(false),
                })
            }
        }
    }
}

/// Probes the device at `config` and returns its identity.
///
/// # Errors
///
/// Returns error if the device is unreachable or the response matches no
/// known generation.
pub async fn probe(config: &HttpConfig) -> Result<DeviceInfo, Error> {
    let transport = config.clone().into_transport()?;
    let response = transport.get("shelly", &[]).await?;
    let info = DeviceInfo::from_response(&response)?;

    tracing::debug!(
        host = %config.host(),
        generation = %info.generation,
        model = %info.model,
        "Probed device generation"
    );

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_gen2_identity() {
        let info = DeviceInfo::from_value(json!({
            "name": null,
            "id": "shellyplus1-a8032ab12345",
            "mac": "A8032AB12345",
            "model": "SNSW-001X16EU",
            "gen": 2,
            "fw_id": "20231107-164738/1.0.8-gb17e3e2",
            "ver": "1.0.8",
            "app": "Plus1",
            "auth_en": true,
            "auth_domain": "shellyplus1-a8032ab12345"
        }))
        .unwrap();

        assert_eq!(info.generation, Generation::Gen2Plus(2));
        assert_eq!(info.model, "SNSW-001X16EU");
        assert_eq!(info.device_type.as_deref(), Some("Plus1"));
        assert_eq!(info.firmware.as_deref(), Some("1.0.8"));
        assert!(info.auth_enabled);
        assert_eq!(info.mac, Some("A8:03:2A:B1:23:45".parse().unwrap()));
    }

    #[test]
    fn parse_gen1_identity() {
        let info = DeviceInfo::from_value(json!({
            "type": "SHSW-1",
            "mac": "A4CF12F45678",
            "auth": false,
            "fw": "20230913-112003/v1.14.0-gcb84623",
            "discoverable": true,
            "num_outputs": 1
        }))
        .unwrap();

        assert_eq!(info.generation, Generation::Gen1);
        assert_eq!(info.model, "SHSW-1");
        assert_eq!(info.id, "shsw-1-f45678");
        assert!(!info.auth_enabled);
    }

    #[test]
    fn parse_gen3_identity() {
        let info = DeviceInfo::from_value(json!({
            "id": "shelly1minig3-543204abcdef",
            "model": "S3SW-001X8EU",
            "gen": 3,
            "app": "Mini1G3"
        }))
        .unwrap();
        assert_eq!(info.generation, Generation::Gen2Plus(3));
        assert!(info.mac.is_none());
    }

    #[test]
    fn parse_unknown_body_fails() {
        let err = DeviceInfo::from_value(json!({"hello": "world"})).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedFormat(_)));
    }
}
