// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Waiting for a provisioned device to join the target network.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::platform::MdnsBrowser;
use crate::types::MacAddress;

/// Default pause between two mDNS polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls mDNS until a device with `mac` announces an address.
///
/// Each poll browses for one `interval`; a poll that returns early is padded
/// to a full interval, so polls start at a fixed rate. The loop returns
/// within `timeout` plus one interval.
///
/// A failing browse counts as a poll that found nothing.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if the device did not appear within `timeout`
/// and [`Error::Cancelled`] if `cancel` fired first.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use shelly_onboard::platform::MulticastMdnsBrowser;
/// use shelly_onboard::provision::{DEFAULT_POLL_INTERVAL, wait_for_device_on_network};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> shelly_onboard::Result<()> {
/// let mac = "A8:03:2A:B1:23:45".parse()?;
/// let address = wait_for_device_on_network(
///     &MulticastMdnsBrowser::new(),
///     mac,
///     Duration::from_secs(60),
///     DEFAULT_POLL_INTERVAL,
///     &CancellationToken::new(),
/// )
/// .await?;
/// println!("device is at {address}");
/// # Ok(())
/// # }
/// ```
pub async fn wait_for_device_on_network(
    browser: &dyn MdnsBrowser,
    mac: MacAddress,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<String, Error> {
    let deadline = Instant::now() + timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let poll_start = Instant::now();

        match browser.browse(interval, cancel).await {
            Ok(services) => {
                let hit = services
                    .into_iter()
                    .filter(|s| s.mac() == Some(mac))
                    .find_map(|s| s.address);
                if let Some(address) = hit {
                    tracing::info!(mac = %mac, address = %address, attempt, "Device reappeared on network");
                    return Ok(address.to_string());
                }
            }
            Err(e) => tracing::debug!(mac = %mac, attempt, error = %e, "mDNS poll failed"),
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if Instant::now() >= deadline {
            tracing::debug!(mac = %mac, attempts = attempt, "Device did not reappear");
            return Err(Error::Timeout(timeout));
        }

        tokio::select! {
            () = tokio::time::sleep_until(poll_start + interval) => {}
            () = cancel.cancelled() => return Err(Error::Cancelled),
        }
    }
}
