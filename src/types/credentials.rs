// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! WiFi credentials pushed to devices during provisioning.

use std::fmt;

use crate::error::ProvisionError;

/// Maximum SSID length in bytes (IEEE 802.11).
const MAX_SSID_LEN: usize = 32;

/// Valid WPA2 passphrase lengths in bytes.
const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 8..=63;

/// WiFi station credentials.
///
/// The password is never printed by the `Debug` implementation.
///
/// # Examples
///
/// ```
/// use shelly_onboard::types::WifiCredentials;
///
/// let creds = WifiCredentials::new("HomeNet", "correct horse");
/// assert!(creds.validate().is_ok());
///
/// let open = WifiCredentials::open("CafeGuest");
/// assert!(open.password().is_none());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    ssid: String,
    password: Option<String>,
}

impl WifiCredentials {
    /// Creates credentials for a protected network.
    #[must_use]
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: Some(password.into()),
        }
    }

    /// Creates credentials for an open network.
    #[must_use]
    pub fn open(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: None,
        }
    }

    /// Returns the SSID.
    #[must_use]
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Returns the password, if any.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Checks SSID and passphrase lengths.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidCredentials`] if the SSID is empty or
    /// longer than 32 bytes, or if a password is present but not 8 to 63 bytes.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.ssid.is_empty() || self.ssid.len() > MAX_SSID_LEN {
            return Err(ProvisionError::InvalidCredentials(format!(
                "SSID must be 1 to {MAX_SSID_LEN} bytes, got {}",
                self.ssid.len()
            )));
        }

        if let Some(password) = &self.password
            && !PASSWORD_LEN.contains(&password.len())
        {
            return Err(ProvisionError::InvalidCredentials(format!(
                "password must be {} to {} bytes, got {}",
                PASSWORD_LEN.start(),
                PASSWORD_LEN.end(),
                password.len()
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_open_network() {
        assert!(WifiCredentials::open("Guest").validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_ssid() {
        let err = WifiCredentials::new("", "password123").validate().unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidCredentials(_)));
    }

    #[test]
    fn validate_rejects_long_ssid() {
        let ssid = "x".repeat(33);
        assert!(WifiCredentials::open(ssid).validate().is_err());
    }

    #[test]
    fn validate_rejects_short_password() {
        assert!(WifiCredentials::new("HomeNet", "short").validate().is_err());
    }

    #[test]
    fn debug_hides_password() {
        let creds = WifiCredentials::new("HomeNet", "supersecret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("HomeNet"));
        assert!(!debug.contains("supersecret"));
    }
}
