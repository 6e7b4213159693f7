// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Onboarding progress events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// One state of a provisioning workflow.
///
/// The BLE workflow walks `Init`, `TransmitCredentials`, `AwaitNetwork`,
/// `Register`. The access point workflow walks `ConnectDeviceAp`,
/// `WaitDhcp`, `ConfigureWifi`, `ReconnectOperator`, `AwaitNetwork`,
/// `Register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardStep {
    /// Validating the job and reading the device over BLE.
    Init,
    /// Pushing WiFi credentials over BLE.
    TransmitCredentials,
    /// Joining the device access point.
    ConnectDeviceAp,
    /// Waiting for an address from the device access point.
    WaitDhcp,
    /// Pushing WiFi credentials over the device access point.
    ConfigureWifi,
    /// Returning the operator machine to its own network.
    ReconnectOperator,
    /// Waiting for the device to announce itself on the target network.
    AwaitNetwork,
    /// Adding the device to the registry.
    Register,
}

impl OnboardStep {
    /// Returns a short lowercase name for the step.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::TransmitCredentials => "transmit-credentials",
            Self::ConnectDeviceAp => "connect-device-ap",
            Self::WaitDhcp => "wait-dhcp",
            Self::ConfigureWifi => "configure-wifi",
            Self::ReconnectOperator => "reconnect-operator",
            Self::AwaitNetwork => "await-network",
            Self::Register => "register",
        }
    }
}

impl fmt::Display for OnboardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted while devices are onboarded.
///
/// Every event carries the [`JobId`] of its onboarding attempt so progress
/// of concurrent BLE jobs can be told apart.
///
/// # Examples
///
/// ```
/// use shelly_onboard::event::{OnboardEvent, OnboardStep};
/// use shelly_onboard::types::JobId;
///
/// let job_id = JobId::new();
/// let event = OnboardEvent::step(job_id, "shellyplus1-a8032ab12345", OnboardStep::Init);
///
/// assert_eq!(event.job_id(), job_id);
/// assert!(!event.is_terminal());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OnboardEvent {
    /// A workflow step started.
    StepStarted {
        /// The onboarding attempt.
        job_id: JobId,
        /// Name of the device being onboarded.
        device: String,
        /// The step.
        step: OnboardStep,
    },

    /// A step failed without ending the workflow.
    ///
    /// Emitted for degraded steps such as a device that never reappeared.
    StepDegraded {
        /// The onboarding attempt.
        job_id: JobId,
        /// Name of the device being onboarded.
        device: String,
        /// The step.
        step: OnboardStep,
        /// Failure message.
        error: String,
    },

    /// The workflow ended successfully.
    Completed {
        /// The onboarding attempt.
        job_id: JobId,
        /// Name of the device being onboarded.
        device: String,
        /// Address on the target network, if the device reappeared.
        new_address: Option<String>,
        /// Whether the device is now registered.
        registered: bool,
    },

    /// The workflow ended with an error.
    Failed {
        /// The onboarding attempt.
        job_id: JobId,
        /// Name of the device being onboarded.
        device: String,
        /// Step that failed.
        step: OnboardStep,
        /// Failure message.
        error: String,
    },
}

impl OnboardEvent {
    /// Returns the job id associated with this event.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        match self {
            Self::StepStarted { job_id, .. }
            | Self::StepDegraded { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => *job_id,
        }
    }

    /// Returns the name of the device being onboarded.
    #[must_use]
    pub fn device(&self) -> &str {
        match self {
            Self::StepStarted { device, .. }
            | Self::StepDegraded { device, .. }
            | Self::Completed { device, .. }
            | Self::Failed { device, .. } => device,
        }
    }

    /// Returns `true` if this event ends its job.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Creates a step started event.
    #[must_use]
    pub fn step(job_id: JobId, device: impl Into<String>, step: OnboardStep) -> Self {
        Self::StepStarted {
            job_id,
            device: device.into(),
            step,
        }
    }

    /// Creates a degraded step event.
    #[must_use]
    pub fn degraded(
        job_id: JobId,
        device: impl Into<String>,
        step: OnboardStep,
        error: impl Into<String>,
    ) -> Self {
        Self::StepDegraded {
            job_id,
            device: device.into(),
            step,
            error: error.into(),
        }
    }

    /// Creates a completion event.
    #[must_use]
    pub fn completed(
        job_id: JobId,
        device: impl Into<String>,
        new_address: Option<String>,
        registered: bool,
    ) -> Self {
        Self::Completed {
            job_id,
            device: device.into(),
            new_address,
            registered,
        }
    }

    /// Creates a failure event.
    #[must_use]
    pub fn failed(
        job_id: JobId,
        device: impl Into<String>,
        step: OnboardStep,
        error: impl Into<String>,
    ) -> Self {
        Self::Failed {
            job_id,
            device: device.into(),
            step,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_cover_every_variant() {
        let id = JobId::new();
        let events = [
            OnboardEvent::step(id, "dev", OnboardStep::Init),
            OnboardEvent::degraded(id, "dev", OnboardStep::AwaitNetwork, "timeout"),
            OnboardEvent::completed(id, "dev", None, false),
            OnboardEvent::failed(id, "dev", OnboardStep::TransmitCredentials, "refused"),
        ];
        for event in &events {
            assert_eq!(event.job_id(), id);
            assert_eq!(event.device(), "dev");
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 2);
    }

    #[test]
    fn serializes_with_tag() {
        let event = OnboardEvent::step(JobId::new(), "dev", OnboardStep::ConfigureWifi);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "step_started");
        assert_eq!(json["step"], "configure-wifi");
    }

    #[test]
    fn step_names() {
        assert_eq!(OnboardStep::ReconnectOperator.to_string(), "reconnect-operator");
        assert_eq!(OnboardStep::WaitDhcp.as_str(), "wait-dhcp");
    }
}
