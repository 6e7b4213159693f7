// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform seams: Bluetooth, WiFi and mDNS.
//!
//! Radio access is operating-system specific. The discovery scanners and the
//! provisioner talk to the platform only through the traits in this module,
//! so applications plug in their own backends and tests plug in fakes.
//!
//! Platforms without a given capability use the `Unsupported*` types, whose
//! operations fail with [`Error::Unsupported`]. Callers treat that error as
//! "method not available" rather than as a failure.
//!
//! mDNS needs no special privileges, so a working multicast backend is
//! provided: [`MulticastMdnsBrowser`].

mod dns;
mod mdns;

pub use mdns::{HTTP_SERVICE, MulticastMdnsBrowser, SHELLY_SERVICE};

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::types::{Generation, MacAddress, WifiCredentials};

// ============================================================================
// Bluetooth LE
// ============================================================================

/// One BLE advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleAdvertisement {
    /// Platform address of the peripheral (MAC or opaque identifier).
    pub address: String,
    /// Advertised local name (e.g. `ShellyPlus1-A8032AB12345`).
    pub local_name: String,
    /// Received signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Bluetooth LE access.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Scans for advertisements during `window`.
    async fn scan(&self, window: Duration) -> Result<Vec<BleAdvertisement>, Error>;

    /// Sends one RPC frame over the GATT RPC service of `address` and
    /// returns the `result` object.
    async fn call(&self, address: &str, method: &str, params: Value) -> Result<Value, Error>;
}

/// BLE backend for platforms without Bluetooth support.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBle;

#[async_trait]
impl BleAdapter for UnsupportedBle {
    async fn scan(&self, _window: Duration) -> Result<Vec<BleAdvertisement>, Error> {
        Err(Error::Unsupported("BLE scanning"))
    }

    async fn call(&self, _address: &str, _method: &str, _params: Value) -> Result<Value, Error> {
        Err(Error::Unsupported("BLE RPC"))
    }
}

// ============================================================================
// WiFi
// ============================================================================

/// One network seen by a WiFi scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiNetwork {
    /// Network name.
    pub ssid: String,
    /// Signal strength in dBm.
    pub signal: Option<i16>,
}

/// WiFi station control of the operator machine.
#[async_trait]
pub trait WifiManager: Send + Sync {
    /// Performs one scan sweep.
    async fn scan_networks(&self) -> Result<Vec<WifiNetwork>, Error>;

    /// Returns the SSID the machine is currently joined to.
    async fn current_network(&self) -> Result<Option<String>, Error>;

    /// Joins a network. Open networks have no password.
    async fn connect(&self, credentials: &WifiCredentials) -> Result<(), Error>;

    /// Joins a network using a profile the platform already stores.
    ///
    /// The default joins `ssid` as an open network; backends with a
    /// credential store override it.
    async fn connect_saved(&self, ssid: &str) -> Result<(), Error> {
        self.connect(&WifiCredentials::open(ssid)).await
    }
}

/// WiFi backend for platforms without station control.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedWifi;

#[async_trait]
impl WifiManager for UnsupportedWifi {
    async fn scan_networks(&self) -> Result<Vec<WifiNetwork>, Error> {
        Err(Error::Unsupported("WiFi scanning"))
    }

    async fn current_network(&self) -> Result<Option<String>, Error> {
        Err(Error::Unsupported("WiFi status"))
    }

    async fn connect(&self, _credentials: &WifiCredentials) -> Result<(), Error> {
        Err(Error::Unsupported("WiFi connection"))
    }
}

// ============================================================================
// mDNS
// ============================================================================

/// One resolved DNS-SD service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsService {
    /// Instance name without the service suffix
    /// (`shellyplus1-a8032ab12345`).
    pub instance: String,
    /// Service type the instance was found under (`_shelly._tcp.local`).
    pub service_type: String,
    /// Host address.
    pub address: Option<IpAddr>,
    /// Service port.
    pub port: u16,
    /// TXT record entries.
    pub txt: BTreeMap<String, String>,
}

impl MdnsService {
    /// Returns the MAC address from the `mac` TXT key or the instance name.
    #[must_use]
    pub fn mac(&self) -> Option<MacAddress> {
        self.txt
            .get("mac")
            .and_then(|m| m.parse().ok())
            .or_else(|| MacAddress::from_name_suffix(&self.instance))
    }

    /// Returns the advertised generation.
    ///
    /// Gen2+ devices publish a `gen` TXT key; plain `_http._tcp` Shelly
    /// instances are Gen1.
    #[must_use]
    pub fn generation(&self) -> Generation {
        if let Some(generation) = self.txt.get("gen").and_then(|g| g.parse::<u8>().ok()) {
            return Generation::from(generation);
        }
        if self.service_type.starts_with("_shelly.") {
            Generation::Gen2Plus(2)
        } else if self.service_type.starts_with("_http.") {
            Generation::Gen1
        } else {
            Generation::Unknown
        }
    }

    /// Returns `true` if the instance looks like a Shelly device.
    #[must_use]
    pub fn is_shelly(&self) -> bool {
        self.service_type.starts_with("_shelly.")
            || self.instance.to_ascii_lowercase().starts_with("shelly")
    }
}

/// DNS-SD browsing.
#[async_trait]
pub trait MdnsBrowser: Send + Sync {
    /// Collects service instances announced during `window`.
    ///
    /// Cancellation ends the window early; instances collected so far are
    /// returned.
    async fn browse(
        &self,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<MdnsService>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(instance: &str, service_type: &str) -> MdnsService {
        MdnsService {
            instance: instance.to_string(),
            service_type: service_type.to_string(),
            address: None,
            port: 80,
            txt: BTreeMap::new(),
        }
    }

    #[test]
    fn mac_from_instance_name() {
        let svc = service("shellyplus1-a8032ab12345", "_shelly._tcp.local");
        assert_eq!(svc.mac().unwrap().to_string(), "A8:03:2A:B1:23:45");
    }

    #[test]
    fn mac_from_txt_wins() {
        let mut svc = service("kitchen", "_shelly._tcp.local");
        svc.txt.insert("mac".to_string(), "AABBCCDDEEFF".to_string());
        assert_eq!(svc.mac().unwrap().to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn generation_from_txt_and_service() {
        let mut svc = service("shellypro4pm-aabbccddeeff", "_shelly._tcp.local");
        svc.txt.insert("gen".to_string(), "3".to_string());
        assert_eq!(svc.generation(), Generation::Gen2Plus(3));

        let gen1 = service("shelly1-34945470ab12", "_http._tcp.local");
        assert_eq!(gen1.generation(), Generation::Gen1);
        assert!(gen1.is_shelly());

        assert!(!service("printer", "_http._tcp.local").is_shelly());
    }

    #[tokio::test]
    async fn unsupported_backends() {
        let err = UnsupportedBle.scan(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_unsupported());

        let err = UnsupportedWifi.scan_networks().await.unwrap_err();
        assert!(err.is_unsupported());
        let err = UnsupportedWifi
            .connect(&WifiCredentials::open("Guest"))
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }
}
