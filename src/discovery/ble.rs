// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BLE advertisement scanner.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{DiscoveredDevice, Scanner, parse_device_name};
use crate::error::Error;
use crate::platform::{BleAdapter, BleAdvertisement};
use crate::types::{DiscoverySource, Generation};

/// Finds unprovisioned Gen2+ devices by their BLE advertisements.
#[derive(Clone)]
pub struct BleScanner {
    adapter: Arc<dyn BleAdapter>,
}

impl std::fmt::Debug for BleScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleScanner").finish_non_exhaustive()
    }
}

impl BleScanner {
    /// Creates a scanner over `adapter`.
    #[must_use]
    pub fn new(adapter: Arc<dyn BleAdapter>) -> Self {
        Self { adapter }
    }
}

fn to_device(advertisement: BleAdvertisement) -> Option<DiscoveredDevice> {
    let parsed = parse_device_name(&advertisement.local_name)?;
    // Only Gen2+ devices provision over BLE.
    let generation = if parsed.generation.is_known() {
        parsed.generation
    } else {
        Generation::Gen2Plus(2)
    };

    let mut device = DiscoveredDevice::new(&advertisement.local_name, DiscoverySource::Ble)
        .with_model(parsed.model)
        .with_ble_address(advertisement.address)
        .with_generation(generation);
    if let Some(mac) = parsed.mac {
        device = device.with_mac(mac);
    }
    if let Some(rssi) = advertisement.rssi {
        device = device.with_signal_strength(rssi);
    }
    Some(device)
}

#[async_trait]
impl Scanner for BleScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Ble
    }

    async fn discover(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, Error> {
        let advertisements = tokio::select! {
            () = cancel.cancelled() => return Ok(Vec::new()),
            result = self.adapter.scan(timeout) => result?,
        };

        let devices: Vec<DiscoveredDevice> =
            advertisements.into_iter().filter_map(to_device).collect();
        tracing::debug!(count = devices.len(), "BLE scan finished");
        Ok(devices)
    }
}
