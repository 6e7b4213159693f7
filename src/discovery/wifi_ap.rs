// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device access point scanner.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{AP_DEFAULT_ADDRESS, DiscoveredDevice, Scanner, parse_device_name};
use crate::error::Error;
use crate::platform::{WifiManager, WifiNetwork};
use crate::types::DiscoverySource;

/// Default pause between two scan sweeps.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(3);

/// Finds unprovisioned devices by the access points they open.
///
/// One sweep routinely misses access points on other channels, so the
/// scanner sweeps repeatedly until the deadline and accumulates every Shelly
/// SSID it sees.
#[derive(Clone)]
pub struct WifiApScanner {
    wifi: Arc<dyn WifiManager>,
    interval: Duration,
}

impl std::fmt::Debug for WifiApScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiApScanner")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl WifiApScanner {
    /// Creates a scanner over `wifi`.
    #[must_use]
    pub fn new(wifi: Arc<dyn WifiManager>) -> Self {
        Self {
            wifi,
            interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    /// Sets the pause between sweeps.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

fn to_device(network: &WifiNetwork) -> Option<DiscoveredDevice> {
    let parsed = parse_device_name(&network.ssid)?;
    let mut device = DiscoveredDevice::new(&network.ssid, DiscoverySource::WifiAp)
        .with_model(parsed.model)
        .with_ssid(&network.ssid)
        .with_address(AP_DEFAULT_ADDRESS)
        .with_generation(parsed.generation);
    if let Some(mac) = parsed.mac {
        device = device.with_mac(mac);
    }
    if let Some(signal) = network.signal {
        device = device.with_signal_strength(signal);
    }
    Some(device)
}

#[async_trait]
impl Scanner for WifiApScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::WifiAp
    }

    /// Sweeps until `timeout` elapses or `cancel` fires.
    ///
    /// Fails only if no sweep ever succeeded; a backend reporting
    /// [`Error::Unsupported`] fails immediately.
    async fn discover(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, Error> {
        let deadline = Instant::now() + timeout;
        let mut found: BTreeMap<String, DiscoveredDevice> = BTreeMap::new();
        let mut any_success = false;
        let mut last_error: Option<Error> = None;
        let mut sweeps = 0u32;

        loop {
            let sweep = tokio::select! {
                () = cancel.cancelled() => break,
                result = tokio::time::timeout_at(deadline, self.wifi.scan_networks()) => result,
            };
            sweeps += 1;

            match sweep {
                Err(_elapsed) => break,
                Ok(Ok(networks)) => {
                    any_success = true;
                    for device in networks.iter().filter_map(to_device) {
                        found.insert(device.name.clone(), device);
                    }
                }
                Ok(Err(e)) if e.is_unsupported() => return Err(e),
                Ok(Err(e)) => {
                    tracing::debug!(sweep = sweeps, error = %e, "WiFi scan sweep failed");
                    last_error = Some(e);
                }
            }

            let next = (Instant::now() + self.interval).min(deadline);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep_until(next) => {}
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        if !any_success && let Some(e) = last_error {
            return Err(e);
        }

        tracing::debug!(sweeps, count = found.len(), "WiFi AP scan finished");
        Ok(found.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::platform::UnsupportedWifi;
    use crate::types::WifiCredentials;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays one scripted sweep result per call, then empty sweeps.
    struct ScriptedWifi {
        sweeps: Mutex<VecDeque<Result<Vec<WifiNetwork>, Error>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedWifi {
        fn new(sweeps: Vec<Result<Vec<WifiNetwork>, Error>>) -> Self {
            Self {
                sweeps: Mutex::new(sweeps.into()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl WifiManager for ScriptedWifi {
        async fn scan_networks(&self) -> Result<Vec<WifiNetwork>, Error> {
            *self.calls.lock() += 1;
            self.sweeps.lock().pop_front().unwrap_or(Ok(Vec::new()))
        }

        async fn current_network(&self) -> Result<Option<String>, Error> {
            Ok(None)
        }

        async fn connect(&self, _credentials: &WifiCredentials) -> Result<(), Error> {
            Ok(())
        }
    }

    fn network(ssid: &str) -> WifiNetwork {
        WifiNetwork {
            ssid: ssid.to_string(),
            signal: Some(-50),
        }
    }

    fn failure() -> Error {
        ProtocolError::ConnectionFailed("radio busy".to_string()).into()
    }

    #[tokio::test(start_paused = true)]
    async fn accumulates_across_sweeps() {
        let wifi = Arc::new(ScriptedWifi::new(vec![
            Ok(vec![network("shelly1-A1B2C3"), network("HomeNet")]),
            Err(failure()),
            Ok(vec![network("ShellyPlus1-A8032AB12345"), network("shelly1-A1B2C3")]),
        ]));
        let scanner = WifiApScanner::new(wifi.clone()).with_interval(Duration::from_secs(3));

        let devices = scanner
            .discover(&CancellationToken::new(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.address.as_deref() == Some(AP_DEFAULT_ADDRESS)));
        assert!(devices.iter().all(|d| !d.provisioned));
        assert!(*wifi.calls.lock() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_when_every_sweep_fails() {
        let wifi = Arc::new(ScriptedWifi::new(
            (0..10).map(|_| Err(failure())).collect(),
        ));
        let scanner = WifiApScanner::new(wifi);

        let result = scanner
            .discover(&CancellationToken::new(), Duration::from_secs(7))
            .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_sweeps_are_not_an_error() {
        let scanner = WifiApScanner::new(Arc::new(ScriptedWifi::new(vec![])));
        let devices = scanner
            .discover(&CancellationToken::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn unsupported_backend_fails_fast() {
        let scanner = WifiApScanner::new(Arc::new(UnsupportedWifi));
        let err = scanner
            .discover(&CancellationToken::new(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_keeps_partial_results() {
        let wifi = Arc::new(ScriptedWifi::new(vec![Ok(vec![network("shelly1-A1B2C3")])]));
        let scanner = WifiApScanner::new(wifi);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let devices = scanner
            .discover(&cancel, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert!(started.elapsed() < DEFAULT_SCAN_INTERVAL);
    }
}
