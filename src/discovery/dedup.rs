// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Merging of discovery records that describe the same device.

use std::collections::HashMap;

use super::DiscoveredDevice;
use crate::types::DiscoverySource;

/// Removes duplicate records in a single left-to-right pass.
///
/// Records are keyed by [`DiscoveredDevice::dedup_key`]. The first record of
/// a key keeps its position; a later BLE record replaces a non-BLE record in
/// place, since only BLE carries the GATT address needed for provisioning.
/// Other duplicates are dropped. Records without a key are always kept.
///
/// The result has unique keys, so applying this twice changes nothing.
#[must_use]
pub fn deduplicate(devices: Vec<DiscoveredDevice>) -> Vec<DiscoveredDevice> {
    let mut kept: Vec<DiscoveredDevice> = Vec::with_capacity(devices.len());
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(devices.len());

    for device in devices {
        let Some(key) = device.dedup_key() else {
            kept.push(device);
            continue;
        };

        match seen.get(&key) {
            None => {
                seen.insert(key, kept.len());
                kept.push(device);
            }
            Some(&index) => {
                let stored = &mut kept[index];
                if device.source == DiscoverySource::Ble && stored.source != DiscoverySource::Ble {
                    *stored = device;
                }
            }
        }
    }

    kept
}
