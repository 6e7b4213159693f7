// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory registry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DeviceUpdate, RegisteredDevice, Registry};
use crate::error::RegistryError;

/// Registry that keeps devices in process memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<BTreeMap<String, RegisteredDevice>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with `devices`.
    #[must_use]
    pub fn with_devices(devices: impl IntoIterator<Item = RegisteredDevice>) -> Self {
        let devices = devices
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns `true` if no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get_device(&self, name: &str) -> Result<Option<RegisteredDevice>, RegistryError> {
        Ok(self.devices.read().get(name).cloned())
    }

    async fn register_device(&self, device: RegisteredDevice) -> Result<(), RegistryError> {
        tracing::debug!(device = %device.name, address = %device.address, "Registering device");
        self.devices.write().insert(device.name.clone(), device);
        Ok(())
    }

    async fn list_devices(&self) -> Result<BTreeMap<String, RegisteredDevice>, RegistryError> {
        Ok(self.devices.read().clone())
    }

    async fn update_device_info(
        &self,
        name: &str,
        update: DeviceUpdate,
    ) -> Result<(), RegistryError> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
        device.apply(&update);
        Ok(())
    }
}
