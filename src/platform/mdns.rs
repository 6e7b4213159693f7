// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multicast DNS-SD browser.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::dns::{Message, Record, TYPE_PTR, encode_query, parse_message};
use super::{MdnsBrowser, MdnsService};
use crate::error::{Error, ProtocolError};

/// mDNS multicast group and port.
const MDNS_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 251), 5353);

/// Service type announced by Gen2+ devices.
pub const SHELLY_SERVICE: &str = "_shelly._tcp.local";

/// Generic HTTP service type, the only one Gen1 devices announce.
pub const HTTP_SERVICE: &str = "_http._tcp.local";

const QUERY_ID: u16 = 0x5348;
const DEFAULT_REQUERY_INTERVAL: Duration = Duration::from_secs(1);

/// Browses DNS-SD services with multicast queries from an ephemeral port.
///
/// Queries sent from a port other than 5353 are "legacy unicast" queries:
/// responders answer directly to the querying socket, so no multicast
/// membership or port sharing with a system responder is needed. The query
/// is repeated every second during the window since single datagrams are
/// easily lost on busy WiFi.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use shelly_onboard::platform::{MdnsBrowser, MulticastMdnsBrowser};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> shelly_onboard::Result<()> {
/// let browser = MulticastMdnsBrowser::new();
/// let cancel = CancellationToken::new();
/// for service in browser.browse(Duration::from_secs(3), &cancel).await? {
///     println!("{} at {:?}", service.instance, service.address);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MulticastMdnsBrowser {
    service_types: Vec<String>,
    requery_interval: Duration,
}

impl Default for MulticastMdnsBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MulticastMdnsBrowser {
    /// Creates a browser for the Shelly and HTTP service types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            service_types: vec![SHELLY_SERVICE.to_string(), HTTP_SERVICE.to_string()],
            requery_interval: DEFAULT_REQUERY_INTERVAL,
        }
    }

    /// Replaces the browsed service types.
    #[must_use]
    pub fn with_service_types<I, S>(mut self, service_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_types = service_types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets how often the query is repeated during a browse window.
    #[must_use]
    pub fn with_requery_interval(mut self, interval: Duration) -> Self {
        self.requery_interval = interval.max(Duration::from_millis(100));
        self
    }

    /// Returns the browsed service types.
    #[must_use]
    pub fn service_types(&self) -> &[String] {
        &self.service_types
    }
}

#[async_trait]
impl MdnsBrowser for MulticastMdnsBrowser {
    async fn browse(
        &self,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<MdnsService>, Error> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .await
            .map_err(ProtocolError::Io)?;
        socket
            .set_multicast_ttl_v4(255)
            .map_err(ProtocolError::Io)?;

        let names: Vec<&str> = self.service_types.iter().map(String::as_str).collect();
        let query = encode_query(QUERY_ID, &names, TYPE_PTR).map_err(ProtocolError::Io)?;

        let mut collector = ServiceCollector::new(&self.service_types);
        let deadline = tokio::time::sleep_until(Instant::now() + window);
        tokio::pin!(deadline);
        let mut requery = tokio::time::interval(self.requery_interval);
        let mut buf = vec![0u8; 9000];

        loop {
            tokio::select! {
                () = &mut deadline => break,
                () = cancel.cancelled() => break,
                _ = requery.tick() => {
                    socket.send_to(&query, MDNS_GROUP).await.map_err(ProtocolError::Io)?;
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, source) = received.map_err(ProtocolError::Io)?;
                    match parse_message(&buf[..len]) {
                        Ok(message) if message.is_response => collector.ingest(&message, source.ip()),
                        Ok(_) => {}
                        Err(e) => tracing::trace!(source = %source, error = %e, "Ignoring malformed mDNS packet"),
                    }
                }
            }
        }

        let services = collector.finish();
        tracing::debug!(count = services.len(), "mDNS browse finished");
        Ok(services)
    }
}

#[derive(Debug, Default)]
struct PartialInstance {
    service_type: String,
    host: Option<String>,
    port: u16,
    txt: BTreeMap<String, String>,
    source: Option<IpAddr>,
}

/// Accumulates records from many responses into service instances.
///
/// Responders split PTR, SRV, TXT and A records across packets, so
/// instances are assembled only once the window closes.
#[derive(Debug)]
pub(crate) struct ServiceCollector {
    service_types: Vec<String>,
    instances: BTreeMap<String, PartialInstance>,
    hosts: HashMap<String, Ipv4Addr>,
}

impl ServiceCollector {
    pub(crate) fn new(service_types: &[String]) -> Self {
        Self {
            service_types: service_types
                .iter()
                .map(|s| s.trim_end_matches('.').to_ascii_lowercase())
                .collect(),
            instances: BTreeMap::new(),
            hosts: HashMap::new(),
        }
    }

    pub(crate) fn ingest(&mut self, message: &Message, source: IpAddr) {
        for record in &message.records {
            match record {
                Record::Ptr { name, target } => {
                    let name = name.to_ascii_lowercase();
                    if self.service_types.contains(&name) {
                        let entry = self.instances.entry(target.to_ascii_lowercase()).or_default();
                        entry.service_type = name;
                        entry.source = Some(source);
                    }
                }
                Record::Srv { name, target, port } => {
                    let entry = self.instances.entry(name.to_ascii_lowercase()).or_default();
                    entry.host = Some(target.to_ascii_lowercase());
                    entry.port = *port;
                    entry.source.get_or_insert(source);
                }
                Record::Txt { name, entries } => {
                    let entry = self.instances.entry(name.to_ascii_lowercase()).or_default();
                    entry.txt.extend(entries.clone());
                }
                Record::A { name, addr } => {
                    self.hosts.insert(name.to_ascii_lowercase(), *addr);
                }
                Record::Other => {}
            }
        }
    }

    pub(crate) fn finish(self) -> Vec<MdnsService> {
        let hosts = self.hosts;
        self.instances
            .into_iter()
            // SRV/TXT without a PTR answer belong to services nobody asked for.
            .filter(|(_, partial)| !partial.service_type.is_empty())
            .map(|(full_name, partial)| {
                let suffix = format!(".{}", partial.service_type);
                let instance = full_name
                    .strip_suffix(&suffix)
                    .unwrap_or(&full_name)
                    .to_string();
                let address = partial
                    .host
                    .as_ref()
                    .and_then(|h| hosts.get(h))
                    .map(|a| IpAddr::V4(*a))
                    .or(partial.source);
                MdnsService {
                    instance,
                    service_type: partial.service_type,
                    address,
                    port: if partial.port == 0 { 80 } else { partial.port },
                    txt: partial.txt,
                }
            })
            .filter(MdnsService::is_shelly)
            .collect()
    }
}
