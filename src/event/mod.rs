// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Onboarding progress events.
//!
//! The [`Provisioner`](crate::provision::Provisioner) publishes an
//! [`OnboardEvent`] on every workflow step transition. The [`EventBus`] uses
//! tokio's broadcast channel so several consumers (a progress bar, a log
//! writer) can follow the same jobs. [`EventBus::follow_device`] narrows the
//! stream to the job of one device while parallel jobs share the bus.
//!
//! # Examples
//!
//! ```
//! use shelly_onboard::event::{EventBus, OnboardEvent, OnboardStep};
//! use shelly_onboard::types::JobId;
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(OnboardEvent::step(JobId::new(), "shelly1-a1b2c3", OnboardStep::ConnectDeviceAp));
//! ```

mod event_bus;
mod onboard_event;

pub use event_bus::{DeviceProgress, EventBus};
pub use onboard_event::{OnboardEvent, OnboardStep};
