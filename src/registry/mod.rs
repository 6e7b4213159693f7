// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registry collaborator.
//!
//! The registry is the persistent store of onboarded devices. It is an
//! external service from the point of view of this crate, so it is passed
//! explicitly as an `Arc<dyn Registry>` into the resolver, the discovery
//! aggregator and the provisioner rather than accessed as global state.
//!
//! [`MemoryRegistry`] is an in-process implementation suitable for tests and
//! for embedding applications that persist devices themselves.
//!
//! # Examples
//!
//! ```
//! use shelly_onboard::registry::{MemoryRegistry, Registry, RegisteredDevice};
//! use shelly_onboard::types::Generation;
//!
//! # async fn example() -> shelly_onboard::Result<()> {
//! let registry = MemoryRegistry::new();
//! registry
//!     .register_device(RegisteredDevice::new("kitchen", "192.168.1.40").with_generation(Generation::Gen1))
//!     .await?;
//!
//! let device = registry.get_device("kitchen").await?;
//! assert!(device.is_some());
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryRegistry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::Generation;

/// Device authentication settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// User name (`admin` on Gen2+ devices).
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A device entry in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredDevice {
    /// Unique name of the device.
    pub name: String,
    /// IPv4 address or host name.
    pub address: String,
    /// Protocol generation, `Unknown` until probed.
    #[serde(default)]
    pub generation: Generation,
    /// Device type or application (e.g. `SHSW-1`, `Plus1PM`).
    #[serde(default)]
    pub device_type: Option<String>,
    /// Hardware model identifier.
    #[serde(default)]
    pub model: Option<String>,
    /// Credentials, when the device has authentication enabled.
    #[serde(default)]
    pub auth: Option<AuthInfo>,
}

impl RegisteredDevice {
    /// Creates an entry with unknown generation and no metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            generation: Generation::Unknown,
            device_type: None,
            model: None,
            auth: None,
        }
    }

    /// Sets the generation.
    #[must_use]
    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the device type.
    #[must_use]
    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(AuthInfo {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Applies a partial update, leaving unset fields untouched.
    pub fn apply(&mut self, update: &DeviceUpdate) {
        if let Some(address) = &update.address {
            self.address.clone_from(address);
        }
        if let Some(generation) = update.generation {
            self.generation = generation;
        }
        if let Some(model) = &update.model {
            self.model = Some(model.clone());
        }
        if let Some(device_type) = &update.device_type {
            self.device_type = Some(device_type.clone());
        }
    }
}

/// Partial update of a registry entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUpdate {
    /// New address.
    pub address: Option<String>,
    /// Detected generation.
    pub generation: Option<Generation>,
    /// Detected model.
    pub model: Option<String>,
    /// Detected device type.
    pub device_type: Option<String>,
}

impl DeviceUpdate {
    /// Returns `true` if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.generation.is_none()
            && self.model.is_none()
            && self.device_type.is_none()
    }
}

/// Persistent store of onboarded devices.
///
/// Implementations provide their own consistency guarantees; callers do not
/// assume read-after-write across processes.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Looks up a device by name.
    async fn get_device(&self, name: &str) -> Result<Option<RegisteredDevice>, RegistryError>;

    /// Adds or replaces a device entry.
    async fn register_device(&self, device: RegisteredDevice) -> Result<(), RegistryError>;

    /// Returns every registered device keyed by name.
    async fn list_devices(&self) -> Result<BTreeMap<String, RegisteredDevice>, RegistryError>;

    /// Applies a partial update to a registered device.
    ///
    /// Fails with [`RegistryError::NotRegistered`] for unknown names; callers
    /// using this for opportunistic metadata refresh treat that as expected.
    async fn update_device_info(
        &self,
        name: &str,
        update: DeviceUpdate,
    ) -> Result<(), RegistryError>;

    /// Finds the device registered at `address`, compared case-insensitively.
    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Option<RegisteredDevice>, RegistryError> {
        let devices = self.list_devices().await?;
        Ok(devices
            .into_values()
            .find(|d| d.address.eq_ignore_ascii_case(address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_partial_update() {
        let mut device = RegisteredDevice::new("kitchen", "192.168.1.40").with_model("SHSW-1");
        device.apply(&DeviceUpdate {
            generation: Some(Generation::Gen1),
            ..DeviceUpdate::default()
        });

        assert_eq!(device.generation, Generation::Gen1);
        assert_eq!(device.model.as_deref(), Some("SHSW-1"));
        assert_eq!(device.address, "192.168.1.40");
    }

    #[test]
    fn empty_update() {
        assert!(DeviceUpdate::default().is_empty());
        let update = DeviceUpdate {
            model: Some("SNSW-001X16EU".to_string()),
            ..DeviceUpdate::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn auth_debug_hides_password() {
        let device = RegisteredDevice::new("a", "b").with_auth("admin", "hunter22");
        let debug = format!("{device:?}");
        assert!(!debug.contains("hunter22"));
    }
}
