// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! mDNS scanner.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{DiscoveredDevice, Scanner, parse_device_name};
use crate::error::Error;
use crate::platform::{MdnsBrowser, MdnsService};
use crate::types::DiscoverySource;

/// Finds networked devices through their DNS-SD announcements.
#[derive(Clone)]
pub struct MdnsScanner {
    browser: Arc<dyn MdnsBrowser>,
}

impl std::fmt::Debug for MdnsScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsScanner").finish_non_exhaustive()
    }
}

impl MdnsScanner {
    /// Creates a scanner over `browser`.
    #[must_use]
    pub fn new(browser: Arc<dyn MdnsBrowser>) -> Self {
        Self { browser }
    }
}

fn service_to_device(service: MdnsService) -> Option<DiscoveredDevice> {
    if !service.is_shelly() {
        return None;
    }

    let model = service
        .txt
        .get("app")
        .cloned()
        .or_else(|| parse_device_name(&service.instance).map(|p| p.model));
    let mac = service.mac();
    let generation = service.generation();

    let mut device =
        DiscoveredDevice::new(&service.instance, DiscoverySource::Mdns).with_generation(generation);
    if let Some(model) = model {
        device = device.with_model(model);
    }
    if let Some(mac) = mac {
        device = device.with_mac(mac);
    }
    if let Some(address) = service.address {
        device = device.with_address(address.to_string());
    }
    Some(device)
}

#[async_trait]
impl Scanner for MdnsScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Mdns
    }

    async fn discover(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, Error> {
        let services = self.browser.browse(timeout, cancel).await?;
        Ok(services.into_iter().filter_map(service_to_device).collect())
    }
}
