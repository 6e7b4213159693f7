// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broadcast channel for onboarding events.

use tokio::sync::broadcast;

use super::OnboardEvent;
use crate::types::JobId;

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out of onboarding events to any number of observers.
///
/// Parallel jobs publish into the same bus. An observer either takes every
/// event ([`subscribe`](Self::subscribe)) or follows the job of a single
/// device until it ends ([`follow_device`](Self::follow_device)).
///
/// The channel holds 256 events by default. An observer that falls further
/// behind loses the oldest ones.
///
/// # Examples
///
/// ```
/// use shelly_onboard::event::{EventBus, OnboardEvent, OnboardStep};
/// use shelly_onboard::types::JobId;
///
/// # async fn example() {
/// let bus = EventBus::new();
/// let mut kitchen = bus.follow_device("shelly1-a1b2c3");
///
/// let job = JobId::new();
/// bus.publish(OnboardEvent::step(job, "shelly1-a1b2c3", OnboardStep::Init));
/// bus.publish(OnboardEvent::step(JobId::new(), "shelly1-d4e5f6", OnboardStep::Init));
/// bus.publish(OnboardEvent::completed(job, "shelly1-a1b2c3", None, false));
///
/// while let Some(event) = kitchen.next().await {
///     println!("{event:?}");
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OnboardEvent>,
}

impl EventBus {
    /// Creates an event bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates an event bus buffering up to `capacity` events per observer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receives every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OnboardEvent> {
        self.sender.subscribe()
    }

    /// Follows the next onboarding job of `device`.
    ///
    /// The first event naming the device pins the job; events of later jobs
    /// for the same device are not delivered.
    #[must_use]
    pub fn follow_device(&self, device: impl Into<String>) -> DeviceProgress {
        DeviceProgress {
            receiver: self.sender.subscribe(),
            device: device.into(),
            job_id: None,
            finished: false,
        }
    }

    /// Publishes an event.
    ///
    /// Without observers the event is dropped.
    pub fn publish(&self, event: OnboardEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!(job_id = %event.job_id(), "No onboarding event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Events of one device's onboarding job.
///
/// Created by [`EventBus::follow_device`].
#[derive(Debug)]
pub struct DeviceProgress {
    receiver: broadcast::Receiver<OnboardEvent>,
    device: String,
    job_id: Option<JobId>,
    finished: bool,
}

impl DeviceProgress {
    /// Returns the job being followed, once its first event arrived.
    #[must_use]
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    /// Waits for the next event of the followed job.
    ///
    /// Returns `None` after the job's terminal event, or when every
    /// publisher is gone.
    pub async fn next(&mut self) -> Option<OnboardEvent> {
        while !self.finished {
            let event = match self.receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(device = %self.device, missed, "Onboarding observer lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            match self.job_id {
                Some(id) if id != event.job_id() => continue,
                None if event.device() != self.device => continue,
                None => self.job_id = Some(event.job_id()),
                Some(_) => {}
            }
            self.finished = event.is_terminal();
            return Some(event);
        }
        None
    }
}
