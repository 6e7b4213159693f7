// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identifier to address and generation resolution.
//!
//! An identifier is a registered device name, a registered address, or a
//! bare IP address / host name. Resolution never touches the network;
//! [`GenerationResolver::resolve_with_generation`] additionally probes the
//! device when its generation is still unknown and caches what it learned.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{BestEffort, Error};
use crate::protocol::{DeviceInfo, HttpConfig, probe};
use crate::registry::{AuthInfo, DeviceUpdate, RegisteredDevice, Registry};
use crate::types::Generation;

/// Default timeout of a generation probe.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A device identifier resolved to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    /// The identifier the caller asked for.
    pub identifier: String,
    /// Name of the registry entry, when the device is registered.
    pub registered_name: Option<String>,
    /// Network address (IPv4 or host name).
    pub address: String,
    /// Protocol generation, `Unknown` until probed.
    pub generation: Generation,
    /// Hardware model, when known.
    pub model: Option<String>,
    /// Device type, when known.
    pub device_type: Option<String>,
    /// Credentials, when authentication is configured.
    pub auth: Option<AuthInfo>,
}

impl ResolvedDevice {
    fn from_registry(identifier: &str, device: RegisteredDevice) -> Self {
        Self {
            identifier: identifier.to_string(),
            registered_name: Some(device.name),
            address: device.address,
            generation: device.generation,
            model: device.model,
            device_type: device.device_type,
            auth: device.auth,
        }
    }

    fn from_address(address: &str) -> Self {
        Self {
            identifier: address.to_string(),
            registered_name: None,
            address: address.to_string(),
            generation: Generation::Unknown,
            model: None,
            device_type: None,
            auth: None,
        }
    }

    /// Builds the HTTP configuration for reaching this device.
    #[must_use]
    pub fn http_config(&self, timeout: Duration) -> HttpConfig {
        let config = HttpConfig::new(&self.address).with_timeout(timeout);
        match &self.auth {
            Some(auth) => config.with_credentials(&auth.username, &auth.password),
            None => config,
        }
    }

    fn apply_probe(&mut self, info: &DeviceInfo) {
        self.generation = info.generation;
        self.model = Some(info.model.clone());
        if info.device_type.is_some() {
            self.device_type.clone_from(&info.device_type);
        }
    }
}

/// Probed facts remembered for devices that have no registry entry.
#[derive(Debug, Clone)]
struct CachedProbe {
    generation: Generation,
    model: String,
    device_type: Option<String>,
}

/// Resolves identifiers to addresses and protocol generations.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use shelly_onboard::registry::MemoryRegistry;
/// use shelly_onboard::resolver::GenerationResolver;
///
/// # async fn example() -> shelly_onboard::Result<()> {
/// let resolver = GenerationResolver::new(Arc::new(MemoryRegistry::new()));
/// let device = resolver.resolve_with_generation("192.168.1.40").await?;
/// println!("{} is {}", device.address, device.generation);
/// # Ok(())
/// # }
/// ```
pub struct GenerationResolver {
    registry: Arc<dyn Registry>,
    probe_timeout: Duration,
    probed: Mutex<HashMap<String, CachedProbe>>,
}

impl std::fmt::Debug for GenerationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationResolver")
            .field("probe_timeout", &self.probe_timeout)
            .field("cached", &self.probed.lock().len())
            .finish_non_exhaustive()
    }
}

impl GenerationResolver {
    /// Creates a resolver backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probed: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the timeout of generation probes.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Returns the probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Returns the registry this resolver reads from.
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Resolves an identifier without touching the network.
    ///
    /// Lookup order: registered name, registered address, then the
    /// identifier itself when it looks like an IP address or host name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for a bare name with no registry
    /// entry, or a registry error.
    pub async fn resolve(&self, identifier: &str) -> Result<ResolvedDevice, Error> {
        let identifier = identifier.trim();

        let mut resolved = if let Some(device) = self.registry.get_device(identifier).await? {
            ResolvedDevice::from_registry(identifier, device)
        } else if let Some(device) = self.registry.find_by_address(identifier).await? {
            ResolvedDevice::from_registry(identifier, device)
        } else if looks_like_address(identifier) {
            ResolvedDevice::from_address(identifier)
        } else {
            return Err(Error::DeviceNotFound(identifier.to_string()));
        };

        if !resolved.generation.is_known()
            && let Some(cached) = self.probed.lock().get(&resolved.address)
        {
            resolved.generation = cached.generation;
            resolved.model = Some(cached.model.clone());
            resolved.device_type.clone_from(&cached.device_type);
        }

        Ok(resolved)
    }

    /// Resolves an identifier and probes the device if its generation is
    /// unknown.
    ///
    /// Probing is best-effort: on failure the device is returned with an
    /// unknown generation. On success the result is cached and, for
    /// registered devices, written back to the registry (failures of that
    /// write are logged only).
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`resolve`](Self::resolve); never a probe
    /// error.
    pub async fn resolve_with_generation(&self, identifier: &str) -> Result<ResolvedDevice, Error> {
        let mut resolved = self.resolve(identifier).await?;

        if resolved.generation.is_known() {
            return Ok(resolved);
        }

        let config = resolved.http_config(self.probe_timeout);
        let Some(info) = probe(&config).await.best_effort("generation probe") else {
            tracing::debug!(
                identifier = %resolved.identifier,
                address = %resolved.address,
                "Generation unknown, continuing without it"
            );
            return Ok(resolved);
        };

        resolved.apply_probe(&info);

        self.probed.lock().insert(
            resolved.address.clone(),
            CachedProbe {
                generation: info.generation,
                model: info.model.clone(),
                device_type: info.device_type.clone(),
            },
        );

        if let Some(name) = &resolved.registered_name {
            let update = DeviceUpdate {
                generation: Some(info.generation),
                model: Some(info.model.clone()),
                device_type: info.device_type.clone(),
                ..DeviceUpdate::default()
            };
            self.registry
                .update_device_info(name, update)
                .await
                .best_effort("registry generation refresh");
        }

        tracing::info!(
            identifier = %resolved.identifier,
            generation = %resolved.generation,
            "Resolved device generation"
        );

        Ok(resolved)
    }
}

/// Returns `true` if `identifier` is an IP address or a dotted host name.
fn looks_like_address(identifier: &str) -> bool {
    if identifier.is_empty() {
        return false;
    }
    if identifier.parse::<IpAddr>().is_ok() {
        return true;
    }
    // host, host:port, host.local
    let host = identifier.split(':').next().unwrap_or(identifier);
    host.parse::<IpAddr>().is_ok() || host.contains('.')
}
