// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning workflows.
//!
//! The [`Provisioner`] pushes WiFi credentials to unprovisioned devices and
//! registers them once they show up on the target network:
//!
//! - over BLE ([`Provisioner::onboard_via_ble`]), one device or many in
//!   parallel ([`Provisioner::onboard_ble_parallel`])
//! - over the device's own access point ([`Provisioner::onboard_via_ap`])
//! - devices already on the network are only registered
//!   ([`Provisioner::register_network_devices`])
//!
//! Every workflow returns an [`OnboardingResult`] instead of an error, so a
//! batch reports each device individually.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use shelly_onboard::discovery::{DiscoveryAggregator, DiscoveryOptions};
//! use shelly_onboard::provision::{OnboardOptions, Provisioner};
//! use shelly_onboard::registry::MemoryRegistry;
//! use shelly_onboard::types::{DiscoverySource, WifiCredentials};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> shelly_onboard::Result<()> {
//! let registry = Arc::new(MemoryRegistry::new());
//! let cancel = CancellationToken::new();
//! let devices = DiscoveryAggregator::new(registry.clone())
//!     .discover_for_onboard(&DiscoveryOptions::new().with_ble_only(true), &cancel, |_| {})
//!     .await?;
//!
//! let ble: Vec<_> = devices
//!     .into_iter()
//!     .filter(|d| d.source == DiscoverySource::Ble)
//!     .collect();
//!
//! let provisioner = Provisioner::new(registry);
//! let credentials = WifiCredentials::new("HomeNet", "correct horse");
//! for result in provisioner
//!     .onboard_ble_parallel(&ble, &credentials, &OnboardOptions::new(), &cancel)
//!     .await
//! {
//!     match &result.error {
//!         None => println!("{} at {:?}", result.device.name, result.new_address),
//!         Some(e) => println!("{} failed: {e}", result.device.name),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod provisioner;
mod wait;

pub use provisioner::Provisioner;
pub use wait::{DEFAULT_POLL_INTERVAL, wait_for_device_on_network};

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveredDevice;
use crate::error::Error;
use crate::types::JobId;

/// Default time a provisioned device gets to appear on the network.
const DEFAULT_REAPPEARANCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default wait for an address after joining a device access point.
const DEFAULT_DHCP_WAIT: Duration = Duration::from_secs(5);

/// How a device was onboarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardMethod {
    /// Credentials pushed over Bluetooth LE.
    Ble,
    /// Credentials pushed over the device access point.
    WifiAp,
    /// Already on the network; only registered.
    RegisterOnly,
}

impl fmt::Display for OnboardMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ble => "ble",
            Self::WifiAp => "wifi-ap",
            Self::RegisterOnly => "register-only",
        })
    }
}

/// Options of the provisioning workflows.
///
/// # Examples
///
/// ```
/// use shelly_onboard::provision::OnboardOptions;
/// use std::time::Duration;
///
/// let options = OnboardOptions::new()
///     .with_name("kitchen-light")
///     .with_reappearance_timeout(Duration::from_secs(90));
/// assert!(options.register());
/// assert_eq!(options.poll_interval(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct OnboardOptions {
    skip_register: bool,
    name: Option<String>,
    reappearance_timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    dhcp_wait: Option<Duration>,
    cloud_enabled: Option<bool>,
}

impl OnboardOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the device is registered after provisioning.
    #[must_use]
    pub fn with_register(mut self, register: bool) -> Self {
        self.skip_register = !register;
        self
    }

    /// Registers the device under `name` instead of its discovered name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets how long to wait for the device on the target network.
    #[must_use]
    pub fn with_reappearance_timeout(mut self, timeout: Duration) -> Self {
        self.reappearance_timeout = Some(timeout);
        self
    }

    /// Sets the mDNS poll interval of the reappearance wait.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the wait after joining a device access point.
    #[must_use]
    pub fn with_dhcp_wait(mut self, wait: Duration) -> Self {
        self.dhcp_wait = Some(wait);
        self
    }

    /// Enables or disables the cloud connection while provisioning.
    #[must_use]
    pub fn with_cloud_enabled(mut self, enabled: bool) -> Self {
        self.cloud_enabled = Some(enabled);
        self
    }

    /// Returns `true` if devices are registered after provisioning.
    #[must_use]
    pub fn register(&self) -> bool {
        !self.skip_register
    }

    /// Returns the registration name override.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the reappearance timeout (default 60 seconds).
    #[must_use]
    pub fn reappearance_timeout(&self) -> Duration {
        self.reappearance_timeout
            .unwrap_or(DEFAULT_REAPPEARANCE_TIMEOUT)
    }

    /// Returns the reappearance poll interval (default 2 seconds).
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Returns the DHCP wait (default 5 seconds).
    #[must_use]
    pub fn dhcp_wait(&self) -> Duration {
        self.dhcp_wait.unwrap_or(DEFAULT_DHCP_WAIT)
    }

    /// Returns the cloud setting to push, if any.
    #[must_use]
    pub fn cloud_enabled(&self) -> Option<bool> {
        self.cloud_enabled
    }
}

/// Outcome of one onboarding job.
///
/// Produced once per device. A successful job has no `error`; it may still
/// lack a `new_address` if the device did not reappear in time.
#[derive(Debug)]
pub struct OnboardingResult {
    /// Identifier of the job, matching its [`OnboardEvent`](crate::event::OnboardEvent)s.
    pub job_id: JobId,
    /// The device the job worked on.
    pub device: DiscoveredDevice,
    /// Address of the device on the target network.
    pub new_address: Option<String>,
    /// How the device was onboarded.
    pub method: OnboardMethod,
    /// Whether the device is registered.
    pub registered: bool,
    /// The failure that ended the job.
    pub error: Option<Error>,
    /// When the job ended.
    pub finished_at: DateTime<Utc>,
}

impl OnboardingResult {
    fn new(job_id: JobId, device: DiscoveredDevice, method: OnboardMethod) -> Self {
        Self {
            job_id,
            device,
            new_address: None,
            method,
            registered: false,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Returns `true` if the job ended without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = OnboardOptions::new();
        assert!(options.register());
        assert!(options.name().is_none());
        assert_eq!(options.reappearance_timeout(), Duration::from_secs(60));
        assert_eq!(options.poll_interval(), Duration::from_secs(2));
        assert_eq!(options.dhcp_wait(), Duration::from_secs(5));
        assert!(options.cloud_enabled().is_none());
    }

    #[test]
    fn registration_can_be_disabled() {
        let options = OnboardOptions::new()
            .with_register(false)
            .with_cloud_enabled(false);
        assert!(!options.register());
        assert_eq!(options.cloud_enabled(), Some(false));
    }

    #[test]
    fn method_display() {
        assert_eq!(OnboardMethod::WifiAp.to_string(), "wifi-ap");
        assert_eq!(OnboardMethod::RegisterOnly.to_string(), "register-only");
    }
}
