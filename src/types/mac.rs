// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Normalized MAC addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// A 48-bit MAC address.
///
/// Parsing accepts colon-separated, dash-separated and bare hexadecimal
/// forms in any case. Display is always upper-case and colon-separated, so
/// two addresses compare equal regardless of how the devices reported them.
///
/// # Examples
///
/// ```
/// use shelly_onboard::types::MacAddress;
///
/// let a: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
/// let b: MacAddress = "AABBCCDDEEFF".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "AA:BB:CC:DD:EE:FF");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Creates a MAC address from raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns the address as 12 upper-case hex digits without separators.
    ///
    /// Shelly devices embed this form in their host names and SSIDs.
    #[must_use]
    pub fn compact(&self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }

    /// Extracts a MAC address from a `<model>-<hex>` style device name.
    ///
    /// Returns `None` when the suffix after the last `-` is not exactly
    /// 12 hex digits.
    #[must_use]
    pub fn from_name_suffix(name: &str) -> Option<Self> {
        let (_, suffix) = name.rsplit_once('-')?;
        let suffix = suffix.split('.').next().unwrap_or(suffix);
        if suffix.len() != 12 {
            return None;
        }
        suffix.parse().ok()
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidMac(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseError::InvalidMac(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_formats() {
        let expected = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!("AA:BB:CC:DD:EE:FF".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("aa-bb-cc-dd-ee-ff".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("aabbccddeeff".parse::<MacAddress>().unwrap(), expected);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("AA:BB:CC".parse::<MacAddress>().is_err());
        assert!("GG:BB:CC:DD:EE:FF".parse::<MacAddress>().is_err());
        assert!("".parse::<MacAddress>().is_err());
    }

    #[test]
    fn compact_form() {
        let mac: MacAddress = "a8:03:2a:b1:23:45".parse().unwrap();
        assert_eq!(mac.compact(), "A8032AB12345");
    }

    #[test]
    fn from_name_suffix() {
        assert_eq!(
            MacAddress::from_name_suffix("ShellyPlus1-A8032AB12345"),
            Some("A8:03:2A:B1:23:45".parse().unwrap())
        );
        assert_eq!(
            MacAddress::from_name_suffix("shellyplus1pm-a8032ab12345.local."),
            Some("A8:03:2A:B1:23:45".parse().unwrap())
        );
        // Gen1 APs only carry the last three octets
        assert_eq!(MacAddress::from_name_suffix("shelly1-B12345"), None);
        assert_eq!(MacAddress::from_name_suffix("no_separator"), None);
    }
}
