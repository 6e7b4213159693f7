// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for discovery and provisioning with in-memory platform
//! fakes and wiremock devices.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use shelly_onboard::discovery::{
    DiscoveredDevice, DiscoveryAggregator, DiscoveryOptions, DiscoveryProgress, Scanner,
};
use shelly_onboard::event::{OnboardEvent, OnboardStep};
use shelly_onboard::platform::{MdnsBrowser, MdnsService, WifiManager, WifiNetwork};
use shelly_onboard::provision::{OnboardMethod, OnboardOptions, Provisioner};
use shelly_onboard::registry::{MemoryRegistry, RegisteredDevice, Registry};
use shelly_onboard::types::{DiscoverySource, Generation, MacAddress, WifiCredentials};
use shelly_onboard::{Error, ProtocolError, ProvisionError};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Fakes
// ============================================================================

/// Scanner returning a fixed result.
struct StaticScanner {
    source: DiscoverySource,
    result: Mutex<Option<Result<Vec<DiscoveredDevice>, Error>>>,
}

impl StaticScanner {
    fn found(source: DiscoverySource, devices: Vec<DiscoveredDevice>) -> Arc<Self> {
        Arc::new(Self {
            source,
            result: Mutex::new(Some(Ok(devices))),
        })
    }

    fn failing(source: DiscoverySource, error: Error) -> Arc<Self> {
        Arc::new(Self {
            source,
            result: Mutex::new(Some(Err(error))),
        })
    }
}

#[async_trait]
impl Scanner for StaticScanner {
    fn source(&self) -> DiscoverySource {
        self.source
    }

    async fn discover(
        &self,
        _cancel: &CancellationToken,
        _timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, Error> {
        self.result.lock().take().unwrap_or(Ok(Vec::new()))
    }
}

/// Records every join; joins to SSIDs in `failing` are rejected.
struct FakeWifi {
    current: Option<String>,
    failing: Vec<String>,
    joined: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeWifi {
    fn on(current: &str) -> Self {
        Self {
            current: Some(current.to_string()),
            failing: Vec::new(),
            joined: Mutex::new(Vec::new()),
        }
    }

    fn rejecting(mut self, ssid: &str) -> Self {
        self.failing.push(ssid.to_string());
        self
    }

    fn joined_ssids(&self) -> Vec<String> {
        self.joined.lock().iter().map(|(s, _)| s.clone()).collect()
    }
}

#[async_trait]
impl WifiManager for FakeWifi {
    async fn scan_networks(&self) -> Result<Vec<WifiNetwork>, Error> {
        Ok(Vec::new())
    }

    async fn current_network(&self) -> Result<Option<String>, Error> {
        Ok(self.current.clone())
    }

    async fn connect(&self, credentials: &WifiCredentials) -> Result<(), Error> {
        self.joined.lock().push((
            credentials.ssid().to_string(),
            credentials.password().map(str::to_string),
        ));
        if self.failing.iter().any(|s| s == credentials.ssid()) {
            return Err(ProtocolError::ConnectionFailed("association rejected".to_string()).into());
        }
        Ok(())
    }
}

/// Announces one Gen1 device with its MAC in TXT.
struct AnnouncingMdns {
    mac: &'static str,
    address: Ipv4Addr,
}

#[async_trait]
impl MdnsBrowser for AnnouncingMdns {
    async fn browse(
        &self,
        _window: Duration,
        _cancel: &CancellationToken,
    ) -> Result<Vec<MdnsService>, Error> {
        let mut txt = BTreeMap::new();
        txt.insert("mac".to_string(), self.mac.to_string());
        Ok(vec![MdnsService {
            instance: "shelly1-f45678".to_string(),
            service_type: "_http._tcp.local".to_string(),
            address: Some(IpAddr::V4(self.address)),
            port: 80,
            txt,
        }])
    }
}

fn mac(text: &str) -> MacAddress {
    text.parse().unwrap()
}

// ============================================================================
// Discovery
// ============================================================================

mod discovery {
    use super::*;

    fn aggregator(registry: Arc<MemoryRegistry>, scanners: Vec<Arc<StaticScanner>>) -> DiscoveryAggregator {
        let mut aggregator = DiscoveryAggregator::new(registry);
        for source in DiscoverySource::ALL {
            aggregator = aggregator.with_scanner(StaticScanner::found(source, Vec::new()));
        }
        for scanner in scanners {
            aggregator = aggregator.with_scanner(scanner);
        }
        aggregator
    }

    #[tokio::test]
    async fn same_device_from_three_sources_collapses_to_ble() {
        let same = mac("AA:BB:CC:DD:EE:FF");
        let registry = Arc::new(MemoryRegistry::new());
        let aggregator = aggregator(
            registry,
            vec![
                StaticScanner::found(
                    DiscoverySource::Mdns,
                    vec![
                        DiscoveredDevice::new("shellyplus1-aabbccddeeff", DiscoverySource::Mdns)
                            .with_mac(same)
                            .with_address("192.168.1.50"),
                    ],
                ),
                StaticScanner::found(
                    DiscoverySource::Http,
                    vec![
                        DiscoveredDevice::new("shellyplus1-aabbccddeeff", DiscoverySource::Http)
                            .with_mac(same)
                            .with_address("192.168.1.50"),
                    ],
                ),
                StaticScanner::found(
                    DiscoverySource::Ble,
                    vec![
                        DiscoveredDevice::new("ShellyPlus1-AABBCCDDEEFF", DiscoverySource::Ble)
                            .with_mac(same)
                            .with_ble_address("AA:BB:CC:DD:EE:FF"),
                    ],
                ),
            ],
        );

        let mut progress: Vec<DiscoveryProgress> = Vec::new();
        let devices = aggregator
            .discover_for_onboard(
                &DiscoveryOptions::new().with_timeout(Duration::from_secs(2)),
                &CancellationToken::new(),
                |p| progress.push(p),
            )
            .await
            .unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].source, DiscoverySource::Ble);
        assert_eq!(devices[0].mac, Some(same));
        assert!(!devices[0].provisioned);

        assert_eq!(progress.iter().filter(|p| !p.done).count(), 5);
        assert_eq!(progress.iter().filter(|p| p.done).count(), 5);
        let ble_done = progress
            .iter()
            .find(|p| p.done && p.method == DiscoverySource::Ble)
            .unwrap();
        assert_eq!(ble_done.found, 1);
    }

    #[tokio::test]
    async fn registered_addresses_are_flagged() {
        let registry = Arc::new(MemoryRegistry::with_devices([RegisteredDevice::new(
            "kitchen",
            "192.168.1.40",
        )]));
        let aggregator = aggregator(
            registry,
            vec![
                StaticScanner::found(
                    DiscoverySource::Mdns,
                    vec![
                        DiscoveredDevice::new("shellyplus1-a8032ab12345", DiscoverySource::Mdns)
                            .with_address("192.168.1.40"),
                        DiscoveredDevice::new("shellypro4pm-aabbcc001122", DiscoverySource::Mdns)
                            .with_address("192.168.1.41"),
                    ],
                ),
                StaticScanner::found(
                    DiscoverySource::WifiAp,
                    vec![
                        DiscoveredDevice::new("shelly1-F45678", DiscoverySource::WifiAp)
                            .with_ssid("shelly1-F45678")
                            .with_address("192.168.33.1"),
                    ],
                ),
            ],
        );

        let devices = aggregator
            .discover_for_onboard(
                &DiscoveryOptions::new().with_timeout(Duration::from_secs(2)),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();

        let by_name = |name: &str| devices.iter().find(|d| d.name == name).unwrap();
        assert!(by_name("shellyplus1-a8032ab12345").registered);
        assert!(!by_name("shellypro4pm-aabbcc001122").registered);
        assert!(!by_name("shelly1-F45678").registered);
        assert!(!by_name("shelly1-F45678").provisioned);
    }

    #[tokio::test]
    async fn failing_scanner_is_reported_not_fatal() {
        let aggregator = aggregator(
            Arc::new(MemoryRegistry::new()),
            vec![
                StaticScanner::failing(DiscoverySource::Ble, Error::Unsupported("BLE scanning")),
                StaticScanner::found(
                    DiscoverySource::Coiot,
                    vec![
                        DiscoveredDevice::new("shsw-1-a4cf12f45678", DiscoverySource::Coiot)
                            .with_address("192.168.1.77")
                            .with_generation(Generation::Gen1),
                    ],
                ),
            ],
        );

        let mut progress = Vec::new();
        let devices = aggregator
            .discover_for_onboard(
                &DiscoveryOptions::new().with_timeout(Duration::from_secs(2)),
                &CancellationToken::new(),
                |p| progress.push(p),
            )
            .await
            .unwrap();

        assert_eq!(devices.len(), 1);
        let ble = progress
            .iter()
            .find(|p: &&DiscoveryProgress| p.done && p.method == DiscoverySource::Ble)
            .unwrap();
        assert!(ble.error.is_some());
    }

    #[tokio::test]
    async fn ble_only_runs_one_scanner() {
        let aggregator = aggregator(Arc::new(MemoryRegistry::new()), Vec::new());
        let scanners = aggregator.scanners_for(&DiscoveryOptions::new().with_ble_only(true));
        assert_eq!(scanners.len(), 1);
        assert_eq!(scanners[0].source(), DiscoverySource::Ble);
    }

    #[tokio::test]
    async fn malformed_subnet_is_rejected_upfront() {
        let aggregator = aggregator(Arc::new(MemoryRegistry::new()), Vec::new());
        let result = aggregator
            .discover_for_onboard(
                &DiscoveryOptions::new().with_subnet("192.168.1.0/40"),
                &CancellationToken::new(),
                |_| {},
            )
            .await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}

// ============================================================================
// Access point provisioning
// ============================================================================

mod access_point {
    use super::*;

    const DEVICE_MAC: &str = "A4CF12F45678";

    async fn gen1_device() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shelly"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "SHSW-1",
                "mac": DEVICE_MAC,
                "auth": false
            })))
            .mount(&server)
            .await;
        server
    }

    async fn accept_station(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/settings/sta"))
            .and(query_param("ssid", "HomeNet"))
            .and(query_param("key", "correct horse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"enabled": true})))
            .expect(1)
            .mount(server)
            .await;
    }

    fn ap_device() -> DiscoveredDevice {
        DiscoveredDevice::new("shelly1-F45678", DiscoverySource::WifiAp)
            .with_ssid("shelly1-F45678")
            .with_generation(Generation::Gen1)
    }

    fn options() -> OnboardOptions {
        OnboardOptions::new()
            .with_dhcp_wait(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(50))
            .with_reappearance_timeout(Duration::from_secs(2))
    }

    fn provisioner(
        server: &MockServer,
        registry: Arc<MemoryRegistry>,
        wifi: Arc<FakeWifi>,
    ) -> Provisioner {
        Provisioner::new(registry)
            .with_wifi_manager(wifi)
            .with_mdns_browser(Arc::new(AnnouncingMdns {
                mac: DEVICE_MAC,
                address: Ipv4Addr::new(192, 168, 1, 77),
            }))
            .with_ap_address(server.uri().replace("http://", ""))
            .with_ap_timeout(Duration::from_secs(2))
    }

    fn credentials() -> WifiCredentials {
        WifiCredentials::new("HomeNet", "correct horse")
    }

    #[tokio::test]
    async fn full_workflow_returns_operator_to_original_network() {
        let server = gen1_device().await;
        accept_station(&server).await;
        let registry = Arc::new(MemoryRegistry::new());
        let wifi = Arc::new(FakeWifi::on("OfficeNet"));
        let provisioner = provisioner(&server, registry.clone(), wifi.clone());
        let mut events = provisioner.events().subscribe();

        let result = provisioner
            .onboard_via_ap(&ap_device(), &credentials(), &options(), &CancellationToken::new())
            .await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.method, OnboardMethod::WifiAp);
        assert_eq!(result.new_address.as_deref(), Some("192.168.1.77"));
        assert!(result.registered);
        assert_eq!(result.device.mac, Some(mac(DEVICE_MAC)));
        assert_eq!(wifi.joined_ssids(), vec!["shelly1-F45678", "OfficeNet"]);

        let stored = registry.get_device("shelly1-F45678").await.unwrap().unwrap();
        assert_eq!(stored.address, "192.168.1.77");
        assert_eq!(stored.generation, Generation::Gen1);

        let mut steps = Vec::new();
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                OnboardEvent::StepStarted { step, .. } => steps.push(step),
                OnboardEvent::Completed { registered, .. } => completed = registered,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(completed);
        assert_eq!(
            steps,
            vec![
                OnboardStep::ConnectDeviceAp,
                OnboardStep::WaitDhcp,
                OnboardStep::ConfigureWifi,
                OnboardStep::ReconnectOperator,
                OnboardStep::AwaitNetwork,
                OnboardStep::Register,
            ]
        );
    }

    #[tokio::test]
    async fn configuration_failure_still_reconnects() {
        let server = gen1_device().await;
        Mock::given(method("GET"))
            .and(path("/settings/sta"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let registry = Arc::new(MemoryRegistry::new());
        let wifi = Arc::new(FakeWifi::on("OfficeNet"));
        let provisioner = provisioner(&server, registry.clone(), wifi.clone());
        let mut events = provisioner.events().subscribe();

        let result = provisioner
            .onboard_via_ap(&ap_device(), &credentials(), &options(), &CancellationToken::new())
            .await;

        assert!(matches!(result.error, Some(Error::Protocol(_))));
        assert!(!result.registered);
        assert!(registry.is_empty());
        assert_eq!(wifi.joined_ssids(), vec!["shelly1-F45678", "OfficeNet"]);

        let mut failed_step = None;
        while let Ok(event) = events.try_recv() {
            if let OnboardEvent::Failed { step, .. } = event {
                failed_step = Some(step);
            }
        }
        assert_eq!(failed_step, Some(OnboardStep::ConfigureWifi));
    }

    #[tokio::test]
    async fn failed_rejoin_falls_back_to_provisioned_network() {
        let server = gen1_device().await;
        accept_station(&server).await;
        let wifi = Arc::new(FakeWifi::on("OfficeNet").rejecting("OfficeNet"));
        let provisioner = provisioner(&server, Arc::new(MemoryRegistry::new()), wifi.clone());

        let result = provisioner
            .onboard_via_ap(&ap_device(), &credentials(), &options(), &CancellationToken::new())
            .await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(
            wifi.joined_ssids(),
            vec!["shelly1-F45678", "OfficeNet", "HomeNet"]
        );
        let last = wifi.joined.lock().last().cloned().unwrap();
        assert_eq!(last.1.as_deref(), Some("correct horse"));
    }

    #[tokio::test]
    async fn operator_on_target_network_rejoins_with_pushed_credentials() {
        let server = gen1_device().await;
        accept_station(&server).await;
        let wifi = Arc::new(FakeWifi::on("HomeNet"));
        let provisioner = provisioner(&server, Arc::new(MemoryRegistry::new()), wifi.clone());

        let result = provisioner
            .onboard_via_ap(
                &ap_device(),
                &credentials(),
                &options().with_register(false),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_success());
        assert!(!result.registered);
        assert_eq!(result.new_address.as_deref(), Some("192.168.1.77"));
        let joined = wifi.joined.lock().clone();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[1], ("HomeNet".to_string(), Some("correct horse".to_string())));
    }

    #[tokio::test]
    async fn unreachable_reconnection_is_fatal() {
        let server = gen1_device().await;
        accept_station(&server).await;
        let wifi = Arc::new(
            FakeWifi::on("OfficeNet")
                .rejecting("OfficeNet")
                .rejecting("HomeNet"),
        );
        let provisioner = provisioner(&server, Arc::new(MemoryRegistry::new()), wifi);

        let result = provisioner
            .onboard_via_ap(&ap_device(), &credentials(), &options(), &CancellationToken::new())
            .await;

        assert!(matches!(
            result.error,
            Some(Error::Provision(ProvisionError::Reconnect { .. }))
        ));
    }

    #[tokio::test]
    async fn device_without_ssid_is_rejected() {
        let server = gen1_device().await;
        let wifi = Arc::new(FakeWifi::on("OfficeNet"));
        let provisioner = provisioner(&server, Arc::new(MemoryRegistry::new()), wifi.clone());
        let device = DiscoveredDevice::new("shelly1-F45678", DiscoverySource::Mdns);

        let result = provisioner
            .onboard_via_ap(&device, &credentials(), &options(), &CancellationToken::new())
            .await;

        assert!(matches!(
            result.error,
            Some(Error::Provision(ProvisionError::MissingSsid(_)))
        ));
        assert!(wifi.joined_ssids().is_empty());
    }
}

// ============================================================================
// Register-only onboarding
// ============================================================================

#[tokio::test]
async fn discovered_network_devices_are_registered_once() {
    let registry = Arc::new(MemoryRegistry::new());
    let provisioner = Provisioner::new(registry.clone());
    let devices = vec![
        DiscoveredDevice::new("shellyplus1-a8032ab12345", DiscoverySource::Mdns)
            .with_address("192.168.1.50")
            .with_generation(Generation::Gen2Plus(2))
            .with_model("SNSW-001X16EU"),
    ];

    let first = provisioner.register_network_devices(&devices).await;
    let second = provisioner.register_network_devices(&devices).await;

    assert!(first[0].registered && second[0].registered);
    assert_eq!(registry.len(), 1);
    let stored = registry
        .get_device("shellyplus1-a8032ab12345")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.model.as_deref(), Some("SNSW-001X16EU"));
    assert_eq!(stored.generation, Generation::Gen2Plus(2));
}
