// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `shelly_onboard` library.
//!
//! This module provides the error hierarchy used across the crate: device
//! transport failures, response parsing, registry access, and provisioning
//! workflow failures.
//!
//! # Best-effort operations
//!
//! Several operations are deliberately best-effort: a generation probe that
//! fails, a registry metadata refresh that is rejected, a single discovery
//! scanner that errors out. Those results go through [`BestEffort::best_effort`],
//! which logs the failure as a `tracing` event and turns it into `None`.

use std::time::Duration;

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while talking to a device.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a response or an identifier.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The device registry rejected or failed an operation.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A provisioning workflow step failed.
    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// The identifier does not map to a registered device or address.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The requested capability is not available on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    /// An operation did not complete before its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` if this error means "method not supported here".
    ///
    /// Callers treat these as a missing discovery/provisioning method rather
    /// than as a failure.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    /// Returns `true` if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Protocol(ProtocolError::Timeout(_))
        )
    }
}

/// Errors related to device communication (Gen1 HTTP and Gen2+ RPC).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection to the device failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The device answered an RPC call with an error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Error code reported by the device.
        code: i64,
        /// Error message reported by the device.
        message: String,
    },

    /// Socket-level failure (multicast listeners, mDNS queries).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection handle was used after being closed.
    #[error("connection is closed")]
    Closed,
}

/// Errors related to parsing device responses and identifiers.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the response.
    #[error("missing field in response: {0}")]
    MissingField(String),

    /// Unexpected response format.
    #[error("unexpected response format: {0}")]
    UnexpectedFormat(String),

    /// A MAC address could not be parsed.
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// A subnet in CIDR notation could not be parsed.
    #[error("invalid CIDR subnet: {0}")]
    InvalidCidr(String),
}

/// Errors reported by a device registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry backend is unavailable.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// No device is registered under the given name.
    #[error("device {0} is not registered")]
    NotRegistered(String),
}

/// Errors raised by the provisioning workflows.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// WiFi credentials are malformed.
    #[error("invalid WiFi credentials: {0}")]
    InvalidCredentials(String),

    /// A BLE workflow was requested for a device without a BLE address.
    #[error("device {0} has no BLE address")]
    MissingBleAddress(String),

    /// A device cannot be registered without a network address.
    #[error("device {0} has no network address")]
    MissingAddress(String),

    /// An AP workflow was requested for a device without an SSID.
    #[error("device {0} has no access point SSID")]
    MissingSsid(String),

    /// Joining the device access point failed.
    #[error("failed to join device access point {ssid}: {reason}")]
    ApConnection {
        /// SSID of the device access point.
        ssid: String,
        /// Underlying failure.
        reason: String,
    },

    /// Reconnecting the operator machine to its own network failed.
    #[error("failed to reconnect to {ssid}: {reason}")]
    Reconnect {
        /// SSID the reconnection targeted.
        ssid: String,
        /// Underlying failure.
        reason: String,
    },
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// Conversion of best-effort results into logged, discarded failures.
pub(crate) trait BestEffort<T> {
    /// Logs the error (if any) at `warn` level and returns the success value.
    fn best_effort(self, context: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> BestEffort<T> for std::result::Result<T, E> {
    fn best_effort(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context} failed, continuing");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_display() {
        let err = ProtocolError::Rpc {
            code: -103,
            message: "Invalid argument".to_string(),
        };
        assert_eq!(err.to_string(), "RPC error -103: Invalid argument");
    }

    #[test]
    fn error_from_parse_error() {
        let err: Error = ParseError::InvalidMac("zz".to_string()).into();
        assert!(matches!(err, Error::Parse(ParseError::InvalidMac(_))));
    }

    #[test]
    fn unsupported_is_classified() {
        assert!(Error::Unsupported("BLE").is_unsupported());
        assert!(!Error::Cancelled.is_unsupported());
        assert_eq!(
            Error::Unsupported("BLE").to_string(),
            "BLE is not supported on this platform"
        );
    }

    #[test]
    fn timeout_is_classified() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(Error::Protocol(ProtocolError::Timeout(500)).is_timeout());
        assert!(!Error::DeviceNotFound("x".to_string()).is_timeout());
    }

    #[test]
    fn best_effort_discards_error() {
        let ok: std::result::Result<u8, Error> = Ok(3);
        assert_eq!(ok.best_effort("test"), Some(3));

        let err: std::result::Result<u8, Error> = Err(Error::Cancelled);
        assert_eq!(err.best_effort("test"), None);
    }

    #[test]
    fn provision_error_display() {
        let err = ProvisionError::Reconnect {
            ssid: "HomeNet".to_string(),
            reason: "no saved profile".to_string(),
        };
        assert_eq!(err.to_string(), "failed to reconnect to HomeNet: no saved profile");
    }
}
