// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery sources.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The protocol through which a device was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoverySource {
    /// Bluetooth Low Energy advertisement.
    Ble,
    /// Device access point seen in a WiFi scan.
    WifiAp,
    /// mDNS service announcement.
    Mdns,
    /// CoIoT multicast status announcement.
    Coiot,
    /// HTTP probe of a subnet.
    Http,
}

impl DiscoverySource {
    /// All sources, in the order they are reported to users.
    pub const ALL: [Self; 5] = [Self::Ble, Self::WifiAp, Self::Mdns, Self::Coiot, Self::Http];

    /// Returns a short lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ble => "ble",
            Self::WifiAp => "wifi-ap",
            Self::Mdns => "mdns",
            Self::Coiot => "coiot",
            Self::Http => "http",
        }
    }

    /// Returns `true` for sources that only see unprovisioned devices.
    ///
    /// BLE advertisements and device access points come from devices that
    /// are not yet on the operator network. The remaining sources observe
    /// devices that already are.
    #[must_use]
    pub const fn is_unprovisioned(self) -> bool {
        matches!(self, Self::Ble | Self::WifiAp)
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
