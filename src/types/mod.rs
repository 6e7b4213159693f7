// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared across discovery, resolution and provisioning.
//!
//! # Types
//!
//! - [`Generation`] - Device protocol generation (unknown, Gen1, Gen2+)
//! - [`MacAddress`] - Normalized MAC address used as the deduplication key
//! - [`DiscoverySource`] - Which scanner reported a device
//! - [`WifiCredentials`] - Station credentials pushed during provisioning
//! - [`JobId`] - Identifier of one onboarding attempt

mod credentials;
mod generation;
mod job_id;
mod mac;
mod source;

pub use credentials::WifiCredentials;
pub use generation::Generation;
pub use job_id::JobId;
pub use mac::MacAddress;
pub use source::DiscoverySource;
