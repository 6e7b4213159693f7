// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device discovery across five protocols.
//!
//! Unprovisioned devices are found through their BLE advertisements and the
//! access points they open. Devices already on the network are found through
//! mDNS, CoIoT multicast (Gen1) and an optional HTTP probe of a subnet.
//!
//! Every source produces [`DiscoveredDevice`] records. The
//! [`DiscoveryAggregator`] runs the applicable [`Scanner`]s concurrently,
//! merges their results with [`deduplicate`] and flags devices that are
//! already registered.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use shelly_onboard::discovery::{DiscoveryAggregator, DiscoveryOptions};
//! use shelly_onboard::registry::MemoryRegistry;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> shelly_onboard::Result<()> {
//! let aggregator = DiscoveryAggregator::new(Arc::new(MemoryRegistry::new()));
//! let options = DiscoveryOptions::new().with_timeout(Duration::from_secs(10));
//!
//! let devices = aggregator
//!     .discover_for_onboard(&options, &CancellationToken::new(), |_| {})
//!     .await?;
//!
//! for device in devices.iter().filter(|d| !d.registered) {
//!     println!("{} via {}", device.name, device.source);
//! }
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod ble;
mod coiot;
mod dedup;
mod device;
mod http;
mod mdns;
mod wifi_ap;

pub use aggregator::{DiscoveryAggregator, DiscoveryProgress};
pub use ble::BleScanner;
pub use coiot::{COIOT_GROUP, COIOT_PORT, CoiotAnnounce, CoiotScanner, parse_coiot_announce};
pub use dedup::deduplicate;
pub use device::{AP_DEFAULT_ADDRESS, DiscoveredDevice, ParsedName, parse_device_name};
pub use http::{HttpScanner, generate_subnet_addresses};
pub use mdns::MdnsScanner;
pub use wifi_ap::WifiApScanner;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::types::DiscoverySource;

/// Default overall discovery timeout.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// One discovery protocol.
///
/// Implementations return within `timeout`, and within one scan interval of
/// `cancel` firing. Cancellation is a normal end of the scan: devices found
/// up to that point are returned.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// The source this scanner reports.
    fn source(&self) -> DiscoverySource;

    /// Runs one discovery pass.
    async fn discover(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, Error>;
}

/// Options for [`DiscoveryAggregator::discover_for_onboard`].
///
/// # Examples
///
/// ```
/// use shelly_onboard::discovery::DiscoveryOptions;
/// use std::time::Duration;
///
/// let options = DiscoveryOptions::new()
///     .with_timeout(Duration::from_secs(15))
///     .with_subnet("192.168.1.0/24");
/// assert_eq!(options.timeout(), Duration::from_secs(15));
/// assert_eq!(options.probe_concurrency(), 64);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    timeout: Option<Duration>,
    ble_only: bool,
    ap_only: bool,
    subnet: Option<String>,
    probe_timeout: Option<Duration>,
    probe_concurrency: Option<usize>,
    wifi_scan_interval: Option<Duration>,
}

impl DiscoveryOptions {
    /// Creates options with default settings.
    ///
    /// Default timeout is 30 seconds; every scanner runs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the overall discovery timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs only the BLE scanner.
    #[must_use]
    pub fn with_ble_only(mut self, ble_only: bool) -> Self {
        self.ble_only = ble_only;
        self
    }

    /// Runs only the WiFi access point scanner.
    #[must_use]
    pub fn with_ap_only(mut self, ap_only: bool) -> Self {
        self.ap_only = ap_only;
        self
    }

    /// Enables the HTTP probe of `subnet` (CIDR notation).
    #[must_use]
    pub fn with_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnet = Some(subnet.into());
        self
    }

    /// Sets the timeout of one HTTP host probe.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Sets how many hosts the HTTP probe contacts at once.
    #[must_use]
    pub fn with_probe_concurrency(mut self, concurrency: usize) -> Self {
        self.probe_concurrency = Some(concurrency);
        self
    }

    /// Sets the pause between WiFi scan sweeps.
    #[must_use]
    pub fn with_wifi_scan_interval(mut self, interval: Duration) -> Self {
        self.wifi_scan_interval = Some(interval);
        self
    }

    /// Returns the overall timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_DISCOVERY_TIMEOUT)
    }

    /// Returns `true` if only BLE runs.
    #[must_use]
    pub fn ble_only(&self) -> bool {
        self.ble_only
    }

    /// Returns `true` if only the access point scan runs.
    #[must_use]
    pub fn ap_only(&self) -> bool {
        self.ap_only
    }

    /// Returns the subnet of the HTTP probe.
    #[must_use]
    pub fn subnet(&self) -> Option<&str> {
        self.subnet.as_deref()
    }

    /// Returns the timeout of one HTTP host probe.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout.unwrap_or(http::DEFAULT_PROBE_TIMEOUT)
    }

    /// Returns the HTTP probe concurrency.
    #[must_use]
    pub fn probe_concurrency(&self) -> usize {
        self.probe_concurrency
            .unwrap_or(http::DEFAULT_PROBE_CONCURRENCY)
    }

    /// Returns the pause between WiFi scan sweeps.
    #[must_use]
    pub fn wifi_scan_interval(&self) -> Duration {
        self.wifi_scan_interval
            .unwrap_or(wifi_ap::DEFAULT_SCAN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = DiscoveryOptions::new();
        assert_eq!(options.timeout(), Duration::from_secs(30));
        assert!(!options.ble_only());
        assert!(!options.ap_only());
        assert!(options.subnet().is_none());
        assert_eq!(options.probe_timeout(), Duration::from_secs(2));
        assert_eq!(options.probe_concurrency(), 64);
        assert_eq!(options.wifi_scan_interval(), Duration::from_secs(3));
    }

    #[test]
    fn builder_chain() {
        let options = DiscoveryOptions::new()
            .with_ble_only(true)
            .with_probe_timeout(Duration::from_millis(500))
            .with_wifi_scan_interval(Duration::from_secs(1));
        assert!(options.ble_only());
        assert_eq!(options.probe_timeout(), Duration::from_millis(500));
        assert_eq!(options.wifi_scan_interval(), Duration::from_secs(1));
    }
}
