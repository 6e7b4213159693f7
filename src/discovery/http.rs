// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP subnet probe.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{DiscoveredDevice, Scanner};
use crate::error::{Error, ParseError};
use crate::protocol::{DeviceInfo, HttpConfig, probe};
use crate::types::DiscoverySource;

/// Default timeout of one host probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of hosts probed at once.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 64;

/// Shortest accepted prefix; larger subnets are refused.
const MIN_PREFIX: u8 = 16;

/// Lists the host addresses of an IPv4 subnet in CIDR notation.
///
/// The network and broadcast addresses are excluded. `/31` and `/32`
/// subnets have neither, so all their addresses are returned.
///
/// # Errors
///
/// Returns [`ParseError::InvalidCidr`] for malformed input or for subnets
/// larger than `/16`.
///
/// # Examples
///
/// ```
/// use shelly_onboard::discovery::generate_subnet_addresses;
///
/// let hosts = generate_subnet_addresses("192.168.1.0/24").unwrap();
/// assert_eq!(hosts.len(), 254);
/// assert_eq!(generate_subnet_addresses("10.0.0.4/31").unwrap().len(), 2);
/// ```
pub fn generate_subnet_addresses(cidr: &str) -> Result<Vec<Ipv4Addr>, ParseError> {
    let (first, last) = host_range(cidr)?;
    Ok((first..=last).map(Ipv4Addr::from).collect())
}

/// Returns the first and last probed host of `cidr`.
pub(crate) fn host_range(cidr: &str) -> Result<(u32, u32), ParseError> {
    let invalid = || ParseError::InvalidCidr(cidr.to_string());

    let (ip, prefix) = cidr.trim().split_once('/').ok_or_else(invalid)?;
    let ip: Ipv4Addr = ip.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    if prefix < MIN_PREFIX {
        return Err(ParseError::InvalidCidr(format!(
            "{cidr}: subnets larger than /{MIN_PREFIX} are not scanned"
        )));
    }

    let mask = u32::MAX << (32 - u32::from(prefix));
    let network = u32::from(ip) & mask;
    let broadcast = network | !mask;

    if prefix >= 31 {
        Ok((network, broadcast))
    } else {
        Ok((network + 1, broadcast - 1))
    }
}

pub(crate) fn info_to_device(address: &str, info: DeviceInfo) -> DiscoveredDevice {
    let mut device = DiscoveredDevice::new(info.id, DiscoverySource::Http)
        .with_model(info.model)
        .with_address(address)
        .with_generation(info.generation);
    if let Some(mac) = info.mac {
        device = device.with_mac(mac);
    }
    device
}

/// Probes every host of a subnet with `GET /shelly`.
#[derive(Debug, Clone)]
pub struct HttpScanner {
    subnet: String,
    probe_timeout: Duration,
    concurrency: usize,
}

impl HttpScanner {
    /// Creates a scanner for `subnet` (CIDR notation).
    #[must_use]
    pub fn new(subnet: impl Into<String>) -> Self {
        Self {
            subnet: subnet.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }

    /// Sets the timeout of one host probe.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets how many hosts are probed at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the scanned subnet.
    #[must_use]
    pub fn subnet(&self) -> &str {
        &self.subnet
    }
}

#[async_trait]
impl Scanner for HttpScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Http
    }

    /// Probes hosts until all answered, `timeout` elapses or `cancel` fires.
    /// Devices found before the deadline are returned.
    async fn discover(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, Error> {
        let addresses = generate_subnet_addresses(&self.subnet)?;
        let total = addresses.len();
        let found: Arc<Mutex<Vec<DiscoveredDevice>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let probe_timeout = self.probe_timeout;
            let found = Arc::clone(&found);
            let probing = futures::stream::iter(addresses).for_each_concurrent(
                self.concurrency,
                move |ip| {
                    let found = Arc::clone(&found);
                    async move {
                        let address = ip.to_string();
                        let config = HttpConfig::new(&address).with_timeout(probe_timeout);
                        if let Ok(info) = probe(&config).await {
                            tracing::debug!(address = %address, model = %info.model, "HTTP probe hit");
                            found.lock().push(info_to_device(&address, info));
                        }
                    }
                },
            );

            tokio::select! {
                () = probing => {}
                () = tokio::time::sleep_until(Instant::now() + timeout) => {
                    tracing::debug!(subnet = %self.subnet, "HTTP probe deadline reached");
                }
                () = cancel.cancelled() => {}
            }
        }

        let devices = std::mem::take(&mut *found.lock());
        tracing::debug!(subnet = %self.subnet, hosts = total, count = devices.len(), "HTTP probe finished");
        Ok(devices)
    }
}
