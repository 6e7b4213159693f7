// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Concurrent multi-source discovery.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::http::host_range;
use super::{
    BleScanner, CoiotScanner, DiscoveredDevice, DiscoveryOptions, HttpScanner, MdnsScanner,
    Scanner, WifiApScanner, deduplicate,
};
use crate::error::{BestEffort, Error};
use crate::platform::{
    BleAdapter, MdnsBrowser, MulticastMdnsBrowser, UnsupportedBle, UnsupportedWifi, WifiManager,
};
use crate::registry::Registry;
use crate::types::DiscoverySource;

/// Time scanners get to stop after the deadline before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Progress of one scanner, reported when it starts and when it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryProgress {
    /// The scanner.
    pub method: DiscoverySource,
    /// Devices found (before deduplication).
    pub found: usize,
    /// `false` on the start event, `true` on the completion event.
    pub done: bool,
    /// Failure message, if the scanner failed.
    pub error: Option<String>,
}

/// Runs discovery scanners concurrently and merges their results.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use shelly_onboard::discovery::{DiscoveryAggregator, DiscoveryOptions};
/// use shelly_onboard::registry::MemoryRegistry;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> shelly_onboard::Result<()> {
/// let aggregator = DiscoveryAggregator::new(Arc::new(MemoryRegistry::new()));
/// let options = DiscoveryOptions::new().with_subnet("192.168.1.0/24");
///
/// let devices = aggregator
///     .discover_for_onboard(&options, &CancellationToken::new(), |p| {
///         println!("{}: {} found (done: {})", p.method, p.found, p.done);
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryAggregator {
    registry: Arc<dyn Registry>,
    ble: Arc<dyn BleAdapter>,
    wifi: Arc<dyn WifiManager>,
    mdns: Arc<dyn MdnsBrowser>,
    overrides: BTreeMap<DiscoverySource, Arc<dyn Scanner>>,
}

impl std::fmt::Debug for DiscoveryAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryAggregator")
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl DiscoveryAggregator {
    /// Creates an aggregator with the default platform backends: no BLE,
    /// no WiFi control, multicast mDNS.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            ble: Arc::new(UnsupportedBle),
            wifi: Arc::new(UnsupportedWifi),
            mdns: Arc::new(MulticastMdnsBrowser::new()),
            overrides: BTreeMap::new(),
        }
    }

    /// Sets the BLE backend.
    #[must_use]
    pub fn with_ble_adapter(mut self, ble: Arc<dyn BleAdapter>) -> Self {
        self.ble = ble;
        self
    }

    /// Sets the WiFi backend.
    #[must_use]
    pub fn with_wifi_manager(mut self, wifi: Arc<dyn WifiManager>) -> Self {
        self.wifi = wifi;
        self
    }

    /// Sets the mDNS backend.
    #[must_use]
    pub fn with_mdns_browser(mut self, mdns: Arc<dyn MdnsBrowser>) -> Self {
        self.mdns = mdns;
        self
    }

    /// Replaces the built-in scanner for `scanner.source()`.
    #[must_use]
    pub fn with_scanner(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.overrides.insert(scanner.source(), scanner);
        self
    }

    /// Returns the scanners `options` selects, in reporting order.
    ///
    /// `ble_only` selects BLE, `ap_only` selects WiFi-AP, otherwise every
    /// scanner runs. The HTTP probe needs a subnet and is skipped without one
    /// unless it was replaced with [`with_scanner`](Self::with_scanner).
    #[must_use]
    pub fn scanners_for(&self, options: &DiscoveryOptions) -> Vec<Arc<dyn Scanner>> {
        let sources: &[DiscoverySource] = if options.ble_only() {
            &[DiscoverySource::Ble]
        } else if options.ap_only() {
            &[DiscoverySource::WifiAp]
        } else {
            &DiscoverySource::ALL
        };

        sources
            .iter()
            .filter_map(|&source| self.scanner(source, options))
            .collect()
    }

    fn scanner(&self, source: DiscoverySource, options: &DiscoveryOptions) -> Option<Arc<dyn Scanner>> {
        if let Some(scanner) = self.overrides.get(&source) {
            return Some(Arc::clone(scanner));
        }
        let scanner: Arc<dyn Scanner> = match source {
            DiscoverySource::Ble => Arc::new(BleScanner::new(Arc::clone(&self.ble))),
            DiscoverySource::WifiAp => Arc::new(
                WifiApScanner::new(Arc::clone(&self.wifi)).with_interval(options.wifi_scan_interval()),
            ),
            DiscoverySource::Mdns => Arc::new(MdnsScanner::new(Arc::clone(&self.mdns))),
            DiscoverySource::Coiot => Arc::new(CoiotScanner::new()),
            DiscoverySource::Http => Arc::new(
                HttpScanner::new(options.subnet()?)
                    .with_probe_timeout(options.probe_timeout())
                    .with_concurrency(options.probe_concurrency()),
            ),
        };
        Some(scanner)
    }

    /// Discovers devices for onboarding.
    ///
    /// Selected scanners run concurrently until `options.timeout()`; each
    /// reports a start and a completion event through `progress`. A failing
    /// scanner is logged and reported, never fatal. Results are deduplicated,
    /// then devices whose address (other than the access point default) is
    /// already registered are flagged `registered`.
    ///
    /// Cancelling `cancel` stops every scanner; devices found so far are
    /// returned. The order of the returned list depends on scanner timing.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidCidr`](crate::error::ParseError::InvalidCidr)
    /// if the configured subnet is malformed. Scanner and registry failures
    /// degrade the result instead.
    pub async fn discover_for_onboard<P>(
        &self,
        options: &DiscoveryOptions,
        cancel: &CancellationToken,
        mut progress: P,
    ) -> Result<Vec<DiscoveredDevice>, Error>
    where
        P: FnMut(DiscoveryProgress),
    {
        if let Some(subnet) = options.subnet() {
            host_range(subnet)?;
        }

        let timeout = options.timeout();
        let scanners = self.scanners_for(options);
        let accumulator: Arc<Mutex<Vec<DiscoveredDevice>>> = Arc::new(Mutex::new(Vec::new()));
        let token = cancel.child_token();
        let mut tasks = JoinSet::new();

        tracing::info!(
            scanners = scanners.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Starting discovery"
        );

        for scanner in scanners {
            let method = scanner.source();
            progress(DiscoveryProgress {
                method,
                found: 0,
                done: false,
                error: None,
            });

            let token = token.clone();
            let accumulator = Arc::clone(&accumulator);
            tasks.spawn(async move {
                let result = scanner.discover(&token, timeout).await.map(|devices| {
                    let found = devices.len();
                    accumulator.lock().extend(devices);
                    found
                });
                (method, result)
            });
        }

        let mut deadline = Instant::now() + timeout;
        let mut stopping = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((method, result)) => progress(Self::completion(method, result)),
                        Err(e) => tracing::warn!(error = %e, "Scanner task failed"),
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    if stopping {
                        tracing::warn!(remaining = tasks.len(), "Aborting scanners past deadline");
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        break;
                    }
                    token.cancel();
                    stopping = true;
                    deadline = Instant::now() + SHUTDOWN_GRACE;
                }
            }
        }

        let collected = std::mem::take(&mut *accumulator.lock());
        let mut devices = deduplicate(collected);
        for device in &mut devices {
            device.provisioned = !device.source.is_unprovisioned();
        }
        self.mark_registered(&mut devices).await;

        tracing::info!(count = devices.len(), "Discovery finished");
        Ok(devices)
    }

    fn completion(method: DiscoverySource, result: Result<usize, Error>) -> DiscoveryProgress {
        match result {
            Ok(found) => {
                tracing::debug!(method = %method, found, "Scanner finished");
                DiscoveryProgress {
                    method,
                    found,
                    done: true,
                    error: None,
                }
            }
            Err(e) => {
                if e.is_unsupported() {
                    tracing::debug!(method = %method, error = %e, "Scanner not available");
                } else {
                    tracing::warn!(method = %method, error = %e, "Scanner failed");
                }
                DiscoveryProgress {
                    method,
                    found: 0,
                    done: true,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn mark_registered(&self, devices: &mut [DiscoveredDevice]) {
        if !devices.iter().any(|d| d.address.is_some() && !d.is_on_device_ap()) {
            return;
        }

        let Some(registered) = self
            .registry
            .list_devices()
            .await
            .best_effort("registry lookup during discovery")
        else {
            return;
        };

        let addresses: HashSet<String> = registered
            .into_values()
            .map(|d| d.address.to_ascii_lowercase())
            .collect();

        for device in devices.iter_mut().filter(|d| !d.is_on_device_ap()) {
            if let Some(address) = &device.address {
                device.registered = addresses.contains(&address.to_ascii_lowercase());
            }
        }
    }
}
