// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `shelly_onboard` - discovery and onboarding of Shelly devices.
//!
//! This library finds Shelly devices over five channels, works out which of
//! the two incompatible protocol generations each one speaks, and walks new
//! devices through WiFi provisioning and registration.
//!
//! # Supported Features
//!
//! - **Discovery**: BLE advertisements, device access points, mDNS, CoIoT
//!   multicast and an HTTP subnet probe, merged and deduplicated by MAC
//! - **Generation resolution**: registry lookup with a best-effort
//!   `GET /shelly` probe that fills the registry opportunistically
//! - **Protocol routing**: Gen1 REST and Gen2+ JSON-RPC behind one
//!   [`Connection`](protocol::Connection) type, with automatic fallback
//! - **Provisioning**: credential transfer over BLE or the device access
//!   point, network reappearance detection and idempotent registration
//!
//! Radio access is platform specific and plugged in through the traits of
//! [`platform`]. The device registry is plugged in through
//! [`registry::Registry`].
//!
//! # Quick Start
//!
//! ## Discover and Register Networked Devices
//!
//! ```no_run
//! use std::sync::Arc;
//! use shelly_onboard::discovery::{DiscoveryAggregator, DiscoveryOptions};
//! use shelly_onboard::provision::Provisioner;
//! use shelly_onboard::registry::MemoryRegistry;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> shelly_onboard::Result<()> {
//!     let registry = Arc::new(MemoryRegistry::new());
//!     let options = DiscoveryOptions::new().with_subnet("192.168.1.0/24");
//!
//!     let devices = DiscoveryAggregator::new(registry.clone())
//!         .discover_for_onboard(&options, &CancellationToken::new(), |progress| {
//!             println!("{}: {} found", progress.method, progress.found);
//!         })
//!         .await?;
//!
//!     let fresh: Vec<_> = devices
//!         .into_iter()
//!         .filter(|d| d.provisioned && !d.registered)
//!         .collect();
//!     for result in Provisioner::new(registry).register_network_devices(&fresh).await {
//!         println!("{}: registered={}", result.device.name, result.registered);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Read a Device of Either Generation
//!
//! ```no_run
//! use std::sync::Arc;
//! use shelly_onboard::registry::MemoryRegistry;
//! use shelly_onboard::resolver::GenerationResolver;
//! use shelly_onboard::router::ProtocolRouter;
//!
//! #[tokio::main]
//! async fn main() -> shelly_onboard::Result<()> {
//!     let resolver = GenerationResolver::new(Arc::new(MemoryRegistry::new()));
//!     let router = ProtocolRouter::new(Arc::new(resolver));
//!
//!     let info = router.auto_info("192.168.1.40").await?;
//!     println!("{} ({}) is {}", info.id, info.model, info.generation);
//!     Ok(())
//! }
//! ```

pub mod discovery;
pub mod error;
pub mod event;
pub mod platform;
pub mod protocol;
pub mod provision;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod types;

pub use discovery::{DiscoveredDevice, DiscoveryAggregator, DiscoveryOptions};
pub use error::{Error, ParseError, ProtocolError, ProvisionError, RegistryError, Result};
pub use event::{DeviceProgress, EventBus, OnboardEvent, OnboardStep};
pub use protocol::{Connection, DeviceInfo, HttpConfig};
pub use provision::{OnboardMethod, OnboardOptions, OnboardingResult, Provisioner};
pub use registry::{MemoryRegistry, RegisteredDevice, Registry};
pub use resolver::{GenerationResolver, ResolvedDevice};
pub use router::ProtocolRouter;
pub use types::{DiscoverySource, Generation, JobId, MacAddress, WifiCredentials};
