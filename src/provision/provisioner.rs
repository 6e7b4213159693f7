// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning orchestration.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{OnboardMethod, OnboardOptions, OnboardingResult, wait_for_device_on_network};
use crate::discovery::{AP_DEFAULT_ADDRESS, DiscoveredDevice};
use crate::error::{BestEffort, Error, ProvisionError};
use crate::event::{EventBus, OnboardEvent, OnboardStep};
use crate::platform::{
    BleAdapter, MdnsBrowser, MulticastMdnsBrowser, UnsupportedBle, UnsupportedWifi, WifiManager,
};
use crate::protocol::{Connection, DeviceInfo, HttpConfig, probe, wifi_station_params};
use crate::registry::{RegisteredDevice, Registry};
use crate::types::{JobId, WifiCredentials};

/// Timeout of requests sent to a device over its access point.
const DEFAULT_AP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Step bookkeeping of one job: logs and publishes every transition.
struct Job<'a> {
    id: JobId,
    device: &'a str,
    events: &'a EventBus,
}

impl<'a> Job<'a> {
    fn new(device: &'a str, events: &'a EventBus) -> Self {
        Self {
            id: JobId::new(),
            device,
            events,
        }
    }

    fn enter(&self, step: OnboardStep) {
        tracing::debug!(job_id = %self.id, device = %self.device, step = %step, "Onboarding step");
        self.events
            .publish(OnboardEvent::step(self.id, self.device, step));
    }

    fn degrade(&self, step: OnboardStep, error: &Error) {
        tracing::warn!(job_id = %self.id, device = %self.device, step = %step, error = %error, "Onboarding step degraded");
        self.events.publish(OnboardEvent::degraded(
            self.id,
            self.device,
            step,
            error.to_string(),
        ));
    }

    fn fail(&self, mut result: OnboardingResult, step: OnboardStep, error: Error) -> OnboardingResult {
        tracing::warn!(job_id = %self.id, device = %self.device, step = %step, error = %error, "Onboarding failed");
        self.events.publish(OnboardEvent::failed(
            self.id,
            self.device,
            step,
            error.to_string(),
        ));
        result.error = Some(error);
        result.finished_at = Utc::now();
        result
    }

    fn complete(&self, mut result: OnboardingResult) -> OnboardingResult {
        tracing::info!(
            job_id = %self.id,
            device = %self.device,
            method = %result.method,
            address = ?result.new_address,
            registered = result.registered,
            "Onboarding completed"
        );
        self.events.publish(OnboardEvent::completed(
            self.id,
            self.device,
            result.new_address.clone(),
            result.registered,
        ));
        result.finished_at = Utc::now();
        result
    }
}

/// Fills in what a device reported about itself.
fn enrich(device: &mut DiscoveredDevice, info: &DeviceInfo) {
    if device.mac.is_none() {
        device.mac = info.mac;
    }
    if info.generation.is_known() {
        device.generation = info.generation;
    }
    if device.model.is_none() {
        device.model = Some(info.model.clone());
    }
}

/// Runs the onboarding workflows.
///
/// Jobs share nothing but the platform backends and the registry; each job
/// owns its [`OnboardingResult`]. Registrations are serialized so parallel
/// jobs never pick the same free name.
pub struct Provisioner {
    registry: Arc<dyn Registry>,
    ble: Arc<dyn BleAdapter>,
    wifi: Arc<dyn WifiManager>,
    mdns: Arc<dyn MdnsBrowser>,
    events: EventBus,
    ap_address: String,
    ap_timeout: Duration,
    registering: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("ap_address", &self.ap_address)
            .field("ap_timeout", &self.ap_timeout)
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Creates a provisioner with the default platform backends: no BLE,
    /// no WiFi control, multicast mDNS.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            ble: Arc::new(UnsupportedBle),
            wifi: Arc::new(UnsupportedWifi),
            mdns: Arc::new(MulticastMdnsBrowser::new()),
            events: EventBus::new(),
            ap_address: AP_DEFAULT_ADDRESS.to_string(),
            ap_timeout: DEFAULT_AP_REQUEST_TIMEOUT,
            registering: tokio::sync::Mutex::new(()),
        }
    }

    /// Sets the BLE backend.
    #[must_use]
    pub fn with_ble_adapter(mut self, ble: Arc<dyn BleAdapter>) -> Self {
        self.ble = ble;
        self
    }

    /// Sets the WiFi backend.
    #[must_use]
    pub fn with_wifi_manager(mut self, wifi: Arc<dyn WifiManager>) -> Self {
        self.wifi = wifi;
        self
    }

    /// Sets the mDNS backend used to find provisioned devices.
    #[must_use]
    pub fn with_mdns_browser(mut self, mdns: Arc<dyn MdnsBrowser>) -> Self {
        self.mdns = mdns;
        self
    }

    /// Publishes onboarding events on `events` instead of a private bus.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Overrides the address devices use on their own access point.
    ///
    /// Accepts `host` or `host:port`.
    #[must_use]
    pub fn with_ap_address(mut self, address: impl Into<String>) -> Self {
        self.ap_address = address.into();
        self
    }

    /// Sets the request timeout used over a device access point.
    #[must_use]
    pub fn with_ap_timeout(mut self, timeout: Duration) -> Self {
        self.ap_timeout = timeout;
        self
    }

    /// Returns the event bus onboarding events are published on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Onboards a device over Bluetooth LE.
    ///
    /// Reads the device identity, pushes `credentials` (and the cloud
    /// setting, if any), waits for the device to appear on the network and
    /// registers it. Failures before the credentials are accepted end the
    /// job. A device that never reappears is not a failure: the result has
    /// no address and registration is skipped.
    pub async fn onboard_via_ble(
        &self,
        device: &DiscoveredDevice,
        credentials: &WifiCredentials,
        options: &OnboardOptions,
        cancel: &CancellationToken,
    ) -> OnboardingResult {
        let job = Job::new(&device.name, &self.events);
        let mut result = OnboardingResult::new(job.id, device.clone(), OnboardMethod::Ble);
        tracing::info!(job_id = %job.id, device = %device.name, "Starting BLE onboarding");

        job.enter(OnboardStep::Init);
        let (address, info) = match self.ble_init(device, credentials).await {
            Ok(init) => init,
            Err(e) => return job.fail(result, OnboardStep::Init, e),
        };
        enrich(&mut result.device, &info);

        job.enter(OnboardStep::TransmitCredentials);
        if let Err(e) = self.ble_transmit(&address, credentials, options).await {
            return job.fail(result, OnboardStep::TransmitCredentials, e);
        }

        self.await_and_register(&job, result, options, cancel)
            .await
    }

    async fn ble_init(
        &self,
        device: &DiscoveredDevice,
        credentials: &WifiCredentials,
    ) -> Result<(String, DeviceInfo), Error> {
        credentials.validate()?;
        let address = device
            .ble_address
            .clone()
            .ok_or_else(|| ProvisionError::MissingBleAddress(device.name.clone()))?;
        let reply = self
            .ble
            .call(&address, "Shelly.GetDeviceInfo", json!({}))
            .await?;
        let info = DeviceInfo::from_value(reply)?;
        Ok((address, info))
    }

    async fn ble_transmit(
        &self,
        address: &str,
        credentials: &WifiCredentials,
        options: &OnboardOptions,
    ) -> Result<(), Error> {
        self.ble
            .call(address, "WiFi.SetConfig", wifi_station_params(credentials))
            .await?;
        if let Some(enabled) = options.cloud_enabled() {
            self.ble
                .call(address, "Cloud.SetConfig", json!({"config": {"enable": enabled}}))
                .await
                .best_effort("pushing cloud setting over BLE");
        }
        Ok(())
    }

    /// Onboards several devices over BLE concurrently.
    ///
    /// Results are in the order of `devices`; one failing device does not
    /// affect the others.
    pub async fn onboard_ble_parallel(
        &self,
        devices: &[DiscoveredDevice],
        credentials: &WifiCredentials,
        options: &OnboardOptions,
        cancel: &CancellationToken,
    ) -> Vec<OnboardingResult> {
        tracing::info!(count = devices.len(), "Starting parallel BLE onboarding");
        futures::future::join_all(
            devices
                .iter()
                .map(|device| self.onboard_via_ble(device, credentials, options, cancel)),
        )
        .await
    }

    /// Onboards a device over its own access point.
    ///
    /// Joins the device AP, pushes `credentials` over HTTP and then always
    /// returns the operator machine to a usable network, even when
    /// configuration failed. The machine rejoins the network it was on
    /// before when that differs from the provisioned one, otherwise it joins
    /// the provisioned network with `credentials`. If that fails, one more
    /// attempt targets the provisioned network.
    pub async fn onboard_via_ap(
        &self,
        device: &DiscoveredDevice,
        credentials: &WifiCredentials,
        options: &OnboardOptions,
        cancel: &CancellationToken,
    ) -> OnboardingResult {
        let job = Job::new(&device.name, &self.events);
        let mut result = OnboardingResult::new(job.id, device.clone(), OnboardMethod::WifiAp);
        tracing::info!(job_id = %job.id, device = %device.name, "Starting access point onboarding");

        job.enter(OnboardStep::ConnectDeviceAp);
        let ssid = credentials.validate().and_then(|()| {
            device
                .ssid
                .clone()
                .ok_or_else(|| ProvisionError::MissingSsid(device.name.clone()))
        });
        let ssid = match ssid {
            Ok(ssid) => ssid,
            Err(e) => return job.fail(result, OnboardStep::ConnectDeviceAp, e.into()),
        };

        let original = self
            .wifi
            .current_network()
            .await
            .best_effort("reading current WiFi network")
            .flatten();

        let configured = self
            .configure_over_ap(&job, &ssid, device, credentials, options, cancel)
            .await;

        job.enter(OnboardStep::ReconnectOperator);
        let reconnected = self
            .reconnect_operator(original.as_deref(), credentials)
            .await;

        let info = match (configured, reconnected) {
            (Err((step, e)), reconnected) => {
                if let Err(r) = reconnected {
                    tracing::warn!(device = %device.name, error = %r, "Reconnection after failed configuration also failed");
                }
                return job.fail(result, step, e);
            }
            (Ok(_), Err(e)) => return job.fail(result, OnboardStep::ReconnectOperator, e),
            (Ok(info), Ok(())) => info,
        };
        if let Some(info) = &info {
            enrich(&mut result.device, info);
        }

        self.await_and_register(&job, result, options, cancel)
            .await
    }

    /// Joins the device AP and pushes the credentials.
    ///
    /// Returns the identity the device reported, if the probe succeeded.
    async fn configure_over_ap(
        &self,
        job: &Job<'_>,
        ssid: &str,
        device: &DiscoveredDevice,
        credentials: &WifiCredentials,
        options: &OnboardOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceInfo>, (OnboardStep, Error)> {
        self.wifi
            .connect(&WifiCredentials::open(ssid))
            .await
            .map_err(|e| {
                let error = ProvisionError::ApConnection {
                    ssid: ssid.to_string(),
                    reason: e.to_string(),
                };
                (OnboardStep::ConnectDeviceAp, Error::from(error))
            })?;

        job.enter(OnboardStep::WaitDhcp);
        tokio::select! {
            () = tokio::time::sleep(options.dhcp_wait()) => {}
            () = cancel.cancelled() => return Err((OnboardStep::WaitDhcp, Error::Cancelled)),
        }

        job.enter(OnboardStep::ConfigureWifi);
        let config = HttpConfig::new(&self.ap_address).with_timeout(self.ap_timeout);
        let info = probe(&config)
            .await
            .best_effort("probing device over its access point");
        let generation = info
            .as_ref()
            .map_or(device.generation, |info| info.generation);

        let connection =
            Connection::open(config, generation).map_err(|e| (OnboardStep::ConfigureWifi, e))?;
        let pushed = async {
            connection.set_wifi_station(credentials).await?;
            if let Some(enabled) = options.cloud_enabled() {
                connection
                    .set_cloud_enabled(enabled)
                    .await
                    .best_effort("pushing cloud setting over access point");
            }
            Ok::<_, Error>(())
        }
        .await;
        connection.close();

        pushed.map_err(|e| (OnboardStep::ConfigureWifi, e))?;
        tracing::debug!(device = %device.name, ssid = %credentials.ssid(), "WiFi credentials accepted");
        Ok(info)
    }

    async fn reconnect_operator(
        &self,
        original: Option<&str>,
        credentials: &WifiCredentials,
    ) -> Result<(), Error> {
        let preferred = match original {
            Some(ssid) if ssid != credentials.ssid() => {
                tracing::debug!(ssid = %ssid, "Rejoining original network");
                self.wifi.connect_saved(ssid).await
            }
            _ => {
                tracing::debug!(ssid = %credentials.ssid(), "Joining provisioned network");
                self.wifi.connect(credentials).await
            }
        };
        let Err(first) = preferred else {
            return Ok(());
        };

        tracing::warn!(error = %first, ssid = %credentials.ssid(), "Reconnection failed, retrying with provisioned network");
        self.wifi.connect(credentials).await.map_err(|fallback| {
            ProvisionError::Reconnect {
                ssid: credentials.ssid().to_string(),
                reason: format!("{first}; fallback: {fallback}"),
            }
            .into()
        })
    }

    /// Waits for the device on the network, then registers it.
    async fn await_and_register(
        &self,
        job: &Job<'_>,
        mut result: OnboardingResult,
        options: &OnboardOptions,
        cancel: &CancellationToken,
    ) -> OnboardingResult {
        job.enter(OnboardStep::AwaitNetwork);
        let waited = match result.device.mac {
            Some(mac) => {
                wait_for_device_on_network(
                    self.mdns.as_ref(),
                    mac,
                    options.reappearance_timeout(),
                    options.poll_interval(),
                    cancel,
                )
                .await
            }
            None => Err(Error::DeviceNotFound(format!(
                "{}: MAC address unknown",
                result.device.name
            ))),
        };
        match waited {
            Ok(address) => result.new_address = Some(address),
            Err(e) => job.degrade(OnboardStep::AwaitNetwork, &e),
        }

        if options.register()
            && let Some(address) = result.new_address.clone()
        {
            job.enter(OnboardStep::Register);
            if let Err(e) = self
                .register(&result.device, &address, options.name())
                .await
            {
                return job.fail(result, OnboardStep::Register, e);
            }
            result.registered = true;
        }

        job.complete(result)
    }

    /// Registers devices that are already on the network.
    ///
    /// Devices without an address (or only the access point default) fail
    /// individually with [`ProvisionError::MissingAddress`].
    pub async fn register_network_devices(
        &self,
        devices: &[DiscoveredDevice],
    ) -> Vec<OnboardingResult> {
        let mut results = Vec::with_capacity(devices.len());
        for device in devices {
            let job = Job::new(&device.name, &self.events);
            let mut result =
                OnboardingResult::new(job.id, device.clone(), OnboardMethod::RegisterOnly);

            job.enter(OnboardStep::Register);
            let address = match device.address.as_deref() {
                Some(address) if !device.is_on_device_ap() => address,
                _ => {
                    let error = ProvisionError::MissingAddress(device.name.clone());
                    results.push(job.fail(result, OnboardStep::Register, error.into()));
                    continue;
                }
            };

            match self.register(device, address, None).await {
                Ok(()) => {
                    result.new_address = Some(address.to_string());
                    result.registered = true;
                    results.push(job.complete(result));
                }
                Err(e) => results.push(job.fail(result, OnboardStep::Register, e)),
            }
        }
        results
    }

    /// Adds `device` at `address` unless that address is already registered.
    ///
    /// A name already used by another address gets a numeric suffix.
    async fn register(
        &self,
        device: &DiscoveredDevice,
        address: &str,
        name: Option<&str>,
    ) -> Result<(), Error> {
        // Held across lookup and write; the registry may yield in between.
        let _registering = self.registering.lock().await;
        let existing = self.registry.list_devices().await?;
        if let Some(entry) = existing
            .values()
            .find(|d| d.address.eq_ignore_ascii_case(address))
        {
            tracing::debug!(device = %entry.name, address = %address, "Address already registered");
            return Ok(());
        }

        let base = name.unwrap_or(&device.name);
        let mut candidate = base.to_string();
        let mut suffix = 2;
        while existing.contains_key(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }

        let mut entry =
            RegisteredDevice::new(&candidate, address).with_generation(device.generation);
        if let Some(model) = &device.model {
            entry = entry.with_model(model);
        }
        self.registry.register_device(entry).await?;
        tracing::info!(device = %candidate, address = %address, "Device registered");
        Ok(())
    }
}
