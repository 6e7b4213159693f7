// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generation-tagged connection handle.

use serde_json::Value;

use crate::error::Error;
use crate::protocol::{DeviceInfo, Gen1Client, Gen2Client, HttpConfig};
use crate::types::{Generation, WifiCredentials};

/// An open connection to a device of a known dialect.
///
/// Callers branch on the variant (or on [`is_gen1`](Self::is_gen1) /
/// [`is_gen2`](Self::is_gen2)) to reach generation-specific operations; the
/// uniform operations below dispatch exhaustively.
#[derive(Debug, Clone)]
pub enum Connection {
    /// Gen1 REST connection.
    Gen1(Gen1Client),
    /// Gen2+ RPC connection.
    Gen2(Gen2Client),
}

impl Connection {
    /// Opens a connection speaking the dialect of `generation`.
    ///
    /// An unknown generation opens a Gen2+ connection, the dialect of every
    /// currently produced device.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn open(config: HttpConfig, generation: Generation) -> Result<Self, Error> {
        if generation.is_gen1() {
            Ok(Self::Gen1(Gen1Client::new(config)?))
        } else {
            Ok(Self::Gen2(Gen2Client::new(config)?))
        }
    }

    /// Returns `true` for a Gen1 connection.
    #[must_use]
    pub fn is_gen1(&self) -> bool {
        matches!(self, Self::Gen1(_))
    }

    /// Returns `true` for a Gen2+ connection.
    #[must_use]
    pub fn is_gen2(&self) -> bool {
        matches!(self, Self::Gen2(_))
    }

    /// Returns the Gen1 client, if this is a Gen1 connection.
    #[must_use]
    pub fn as_gen1(&self) -> Option<&Gen1Client> {
        match self {
            Self::Gen1(client) => Some(client),
            Self::Gen2(_) => None,
        }
    }

    /// Returns the Gen2+ client, if this is a Gen2+ connection.
    #[must_use]
    pub fn as_gen2(&self) -> Option<&Gen2Client> {
        match self {
            Self::Gen2(client) => Some(client),
            Self::Gen1(_) => None,
        }
    }

    /// Returns the base URL of the device.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match self {
            Self::Gen1(client) => client.base_url(),
            Self::Gen2(client) => client.base_url(),
        }
    }

    /// Returns the device identity.
    ///
    /// # Errors
    ///
    /// Returns error on transport or parse failure.
    pub async fn info(&self) -> Result<DeviceInfo, Error> {
        match self {
            Self::Gen1(client) => client.info().await,
            Self::Gen2(client) => client.info().await,
        }
    }

    /// Returns the full device status.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure.
    pub async fn status(&self) -> Result<Value, Error> {
        match self {
            Self::Gen1(client) => client.status().await,
            Self::Gen2(client) => client.get_status().await,
        }
    }

    /// Returns the full device configuration.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure.
    pub async fn config(&self) -> Result<Value, Error> {
        match self {
            Self::Gen1(client) => client.settings().await,
            Self::Gen2(client) => client.get_config().await,
        }
    }

    /// Configures and enables the WiFi station interface.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure.
    pub async fn set_wifi_station(&self, credentials: &WifiCredentials) -> Result<Value, Error> {
        match self {
            Self::Gen1(client) => client.set_wifi_station(credentials).await,
            Self::Gen2(client) => client.set_wifi_station(credentials).await,
        }
    }

    /// Enables or disables the cloud connection.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure.
    pub async fn set_cloud_enabled(&self, enabled: bool) -> Result<Value, Error> {
        match self {
            Self::Gen1(client) => client.set_cloud_enabled(enabled).await,
            Self::Gen2(client) => client.set_cloud_enabled(enabled).await,
        }
    }

    /// Releases the connection.
    ///
    /// HTTP connections hold only a pooled client; dropping it releases the
    /// sockets.
    pub fn close(self) {
        tracing::debug!(url = %self.base_url(), gen1 = self.is_gen1(), "Closing connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_gen1() {
        let conn = Connection::open(HttpConfig::new("10.0.0.2"), Generation::Gen1).unwrap();
        assert!(conn.is_gen1());
        assert!(conn.as_gen1().is_some());
        assert!(conn.as_gen2().is_none());
    }

    #[test]
    fn open_unknown_defaults_to_gen2() {
        let conn = Connection::open(HttpConfig::new("10.0.0.2"), Generation::Unknown).unwrap();
        assert!(conn.is_gen2());
        assert_eq!(conn.base_url(), "http://10.0.0.2");
    }

    #[test]
    fn open_gen3_uses_rpc() {
        let conn = Connection::open(HttpConfig::new("10.0.0.2"), Generation::Gen2Plus(3)).unwrap();
        assert!(conn.as_gen2().is_some());
    }
}
