// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovered device records and Shelly name parsing.

use serde::Serialize;

use crate::types::{DiscoverySource, Generation, MacAddress};

/// Address a device serves its own access point on.
pub const AP_DEFAULT_ADDRESS: &str = "192.168.33.1";

/// One device as seen by one discovery source.
///
/// Every scanner produces this shape; fields a source cannot observe stay
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Advertised name (BLE local name, SSID, mDNS instance, device id).
    pub name: String,
    /// Hardware model or application, when known.
    pub model: Option<String>,
    /// Network address. Access point devices carry [`AP_DEFAULT_ADDRESS`].
    pub address: Option<String>,
    /// MAC address, when known.
    pub mac: Option<MacAddress>,
    /// Access point SSID (WiFi-AP source only).
    pub ssid: Option<String>,
    /// Peripheral address for GATT (BLE source only).
    pub ble_address: Option<String>,
    /// Which scanner produced this record.
    pub source: DiscoverySource,
    /// Protocol generation, `Unknown` if the source cannot tell.
    pub generation: Generation,
    /// Signal strength in dBm, for radio sources.
    pub signal_strength: Option<i16>,
    /// Whether the address is already in the registry.
    pub registered: bool,
    /// Whether the device is already on the operator network.
    pub provisioned: bool,
}

impl DiscoveredDevice {
    /// Creates a record with only a name and a source.
    #[must_use]
    pub fn new(name: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            name: name.into(),
            model: None,
            address: None,
            mac: None,
            ssid: None,
            ble_address: None,
            source,
            generation: Generation::Unknown,
            signal_strength: None,
            registered: false,
            provisioned: !source.is_unprovisioned(),
        }
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the network address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the MAC address.
    #[must_use]
    pub fn with_mac(mut self, mac: MacAddress) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Sets the access point SSID.
    #[must_use]
    pub fn with_ssid(mut self, ssid: impl Into<String>) -> Self {
        self.ssid = Some(ssid.into());
        self
    }

    /// Sets the BLE peripheral address.
    #[must_use]
    pub fn with_ble_address(mut self, address: impl Into<String>) -> Self {
        self.ble_address = Some(address.into());
        self
    }

    /// Sets the generation.
    #[must_use]
    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    /// Sets the signal strength.
    #[must_use]
    pub fn with_signal_strength(mut self, dbm: i16) -> Self {
        self.signal_strength = Some(dbm);
        self
    }

    /// Returns the deduplication key: the MAC address, else the lower-cased
    /// name, else `None` when neither is available.
    #[must_use]
    pub fn dedup_key(&self) -> Option<String> {
        if let Some(mac) = self.mac {
            return Some(format!("mac:{mac}"));
        }
        let name = self.name.trim();
        if name.is_empty() {
            None
        } else {
            Some(format!("name:{}", name.to_lowercase()))
        }
    }

    /// Returns `true` if the address is the device access point address.
    #[must_use]
    pub fn is_on_device_ap(&self) -> bool {
        self.address.as_deref() == Some(AP_DEFAULT_ADDRESS)
    }
}

/// What a Shelly-style name (`<Model>-<hex id>`) reveals about a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Model part of the name (`ShellyPlus1`).
    pub model: String,
    /// MAC address, when the suffix has 12 hex digits.
    pub mac: Option<MacAddress>,
    /// Generation implied by the naming scheme.
    pub generation: Generation,
}

/// Parses a BLE local name or access point SSID.
///
/// Returns `None` for names that are not Shelly names. Gen2+ devices use a
/// `shellyplus`/`shellypro`/`shellymini` prefix or a full 12 digit MAC
/// suffix; Gen1 access points use a 6 digit suffix.
///
/// # Examples
///
/// ```
/// use shelly_onboard::discovery::parse_device_name;
/// use shelly_onboard::types::Generation;
///
/// let parsed = parse_device_name("ShellyPlus1-A8032AB12345").unwrap();
/// assert_eq!(parsed.model, "ShellyPlus1");
/// assert!(parsed.mac.is_some());
/// assert!(parsed.generation.is_gen2_plus());
///
/// let parsed = parse_device_name("shelly1-A1B2C3").unwrap();
/// assert_eq!(parsed.generation, Generation::Gen1);
///
/// assert!(parse_device_name("HomeNet").is_none());
/// ```
#[must_use]
pub fn parse_device_name(name: &str) -> Option<ParsedName> {
    let name = name.trim();
    let lower = name.to_ascii_lowercase();
    if !lower.starts_with("shelly") {
        return None;
    }

    let (model, suffix) = name.rsplit_once('-')?;
    if model.is_empty() || suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let mac = MacAddress::from_name_suffix(name);
    let model_lower = model.to_ascii_lowercase();
    let generation = if ["shellyplus", "shellypro", "shellymini"]
        .iter()
        .any(|p| model_lower.starts_with(p))
        || mac.is_some()
    {
        Generation::Gen2Plus(2)
    } else if suffix.len() == 6 {
        Generation::Gen1
    } else {
        Generation::Unknown
    };

    Some(ParsedName {
        model: model.to_string(),
        mac,
        generation,
    })
}
