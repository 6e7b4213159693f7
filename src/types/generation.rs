// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device protocol generation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol generation of a Shelly device.
///
/// Gen1 devices speak a REST dialect over HTTP. Gen2 and later devices speak
/// JSON-RPC over HTTP or WebSocket; they share one dialect, so every generation
/// from 2 upward is represented by [`Generation::Gen2Plus`] carrying the exact
/// number reported by the device.
///
/// Serialized as the plain number (`0` for unknown).
///
/// # Examples
///
/// ```
/// use shelly_onboard::types::Generation;
///
/// assert_eq!(Generation::from(1), Generation::Gen1);
/// assert_eq!(Generation::from(3), Generation::Gen2Plus(3));
/// assert!(Generation::from(3).is_gen2_plus());
/// assert!(!Generation::Unknown.is_known());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Generation {
    /// Generation has not been determined yet.
    #[default]
    Unknown,
    /// First generation (HTTP/REST).
    Gen1,
    /// Second generation or newer (RPC).
    Gen2Plus(u8),
}

impl Generation {
    /// Returns the numeric generation, `0` when unknown.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Gen1 => 1,
            Self::Gen2Plus(n) => n,
        }
    }

    /// Returns `true` for Gen1 devices.
    #[must_use]
    pub const fn is_gen1(self) -> bool {
        matches!(self, Self::Gen1)
    }

    /// Returns `true` for Gen2 and newer devices.
    #[must_use]
    pub const fn is_gen2_plus(self) -> bool {
        matches!(self, Self::Gen2Plus(_))
    }

    /// Returns `true` when the generation has been determined.
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl From<u8> for Generation {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Gen1,
            n => Self::Gen2Plus(n),
        }
    }
}

impl From<Generation> for u8 {
    fn from(value: Generation) -> Self {
        value.number()
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Gen1 => write!(f, "Gen1"),
            Self::Gen2Plus(n) => write!(f, "Gen{n}"),
        }
    }
}
