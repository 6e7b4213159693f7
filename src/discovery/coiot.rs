// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CoIoT multicast listener.
//!
//! Gen1 devices periodically multicast CoAP status messages to
//! `224.0.1.187:5683`. Option 3332 of those messages carries the device
//! identity as `<model>#<device id>#<protocol revision>`.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{DiscoveredDevice, Scanner};
use crate::error::{Error, ProtocolError};
use crate::types::{DiscoverySource, Generation, MacAddress};

/// CoIoT multicast group.
pub const COIOT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);

/// CoIoT port.
pub const COIOT_PORT: u16 = 5683;

/// CoAP option number carrying the device identity.
const OPTION_DEVICE_ID: u16 = 3332;

const PAYLOAD_MARKER: u8 = 0xff;

/// Identity carried by one CoIoT announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoiotAnnounce {
    /// Device type (`SHSW-1`).
    pub model: String,
    /// Device id, usually the MAC without separators.
    pub device_id: String,
    /// CoIoT protocol revision.
    pub revision: Option<String>,
}

/// Extracts the identity from a raw CoAP datagram.
///
/// Returns `None` for datagrams that are not CoAP or carry no option 3332.
#[must_use]
pub fn parse_coiot_announce(datagram: &[u8]) -> Option<CoiotAnnounce> {
    let (&first, rest) = datagram.split_first()?;
    if first >> 6 != 1 {
        return None;
    }
    let token_len = usize::from(first & 0x0f);
    // code (1) + message id (2) + token
    let mut options = rest.get(3 + token_len..)?;
    let mut number: u16 = 0;

    while let Some((&header, tail)) = options.split_first() {
        if header == PAYLOAD_MARKER {
            break;
        }
        let (delta, tail) = extended(header >> 4, tail)?;
        let (length, tail) = extended(header & 0x0f, tail)?;
        number = number.checked_add(delta)?;
        let value = tail.get(..usize::from(length))?;

        if number == OPTION_DEVICE_ID {
            let text = std::str::from_utf8(value).ok()?;
            let mut parts = text.split('#');
            let model = parts.next().filter(|s| !s.is_empty())?;
            let device_id = parts.next().filter(|s| !s.is_empty())?;
            return Some(CoiotAnnounce {
                model: model.to_string(),
                device_id: device_id.to_string(),
                revision: parts.next().map(str::to_string),
            });
        }

        options = &tail[usize::from(length)..];
    }
    None
}

/// Decodes a CoAP option delta/length nibble with its extension bytes.
fn extended(nibble: u8, tail: &[u8]) -> Option<(u16, &[u8])> {
    match nibble {
        0..=12 => Some((u16::from(nibble), tail)),
        13 => {
            let (&b, rest) = tail.split_first()?;
            Some((u16::from(b) + 13, rest))
        }
        14 => {
            let bytes = tail.get(..2)?;
            let value = u16::from_be_bytes([bytes[0], bytes[1]]).checked_add(269)?;
            Some((value, &tail[2..]))
        }
        _ => None,
    }
}

fn announce_to_device(announce: &CoiotAnnounce, address: IpAddr) -> DiscoveredDevice {
    let name = format!("{}-{}", announce.model.to_lowercase(), announce.device_id.to_lowercase());
    let mut device = DiscoveredDevice::new(name, DiscoverySource::Coiot)
        .with_model(&announce.model)
        .with_address(address.to_string())
        .with_generation(Generation::Gen1);
    if announce.device_id.len() == 12
        && let Ok(mac) = announce.device_id.parse::<MacAddress>()
    {
        device = device.with_mac(mac);
    }
    device
}

/// Listens for Gen1 CoIoT announcements.
#[derive(Debug, Clone, Default)]
pub struct CoiotScanner {
    interface: Option<Ipv4Addr>,
}

impl CoiotScanner {
    /// Creates a listener joining the group on the default interface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the multicast group on a specific interface.
    #[must_use]
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = Some(interface);
        self
    }

    fn bind(&self) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(not(target_os = "windows"))]
        socket.set_reuse_port(true)?;
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, COIOT_PORT);
        socket.bind(&socket2::SockAddr::from(addr))?;
        socket.join_multicast_v4(&COIOT_GROUP, &self.interface.unwrap_or(Ipv4Addr::UNSPECIFIED))?;
        socket.set_nonblocking(true)?;
        UdpSocket::from_std(socket.into())
    }
}

#[async_trait]
impl Scanner for CoiotScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Coiot
    }

    async fn discover(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, Error> {
        let socket = self.bind().map_err(ProtocolError::Io)?;
        let deadline = tokio::time::sleep_until(Instant::now() + timeout);
        tokio::pin!(deadline);

        let mut found: BTreeMap<IpAddr, DiscoveredDevice> = BTreeMap::new();
        let mut buf = vec![0u8; 2048];

        loop {
            tokio::select! {
                () = &mut deadline => break,
                () = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => {
                    let (len, source) = received.map_err(ProtocolError::Io)?;
                    if let Some(announce) = parse_coiot_announce(&buf[..len]) {
                        found
                            .entry(source.ip())
                            .or_insert_with(|| announce_to_device(&announce, source.ip()));
                    }
                }
            }
        }

        tracing::debug!(count = found.len(), "CoIoT listen finished");
        Ok(found.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a CoAP NON message with option 3332 = `value`.
    fn announce(value: &str, token: &[u8]) -> Vec<u8> {
        let tkl = u8::try_from(token.len()).unwrap();
        let mut out = vec![0x50 | tkl, 0x1e, 0x12, 0x34];
        out.extend_from_slice(token);
        // Option 3332: delta 3332 -> nibble 14, extension 3332 - 269 = 3063
        let len = value.len();
        let ext = 3332u16 - 269;
        if len < 13 {
            out.push(0xe0 | u8::try_from(len).unwrap());
            out.extend_from_slice(&ext.to_be_bytes());
        } else {
            out.push(0xed);
            out.extend_from_slice(&ext.to_be_bytes());
            out.push(u8::try_from(len - 13).unwrap());
        }
        out.extend_from_slice(value.as_bytes());
        // Option 3412 (validity), delta 80 -> nibble 13, extension 67
        out.extend_from_slice(&[0xd2, 67, 0x00, 0x26]);
        out.push(PAYLOAD_MARKER);
        out.extend_from_slice(br#"{"G":[[0,1101,0]]}"#);
        out
    }

    #[test]
    fn parse_announce() {
        let parsed = parse_coiot_announce(&announce("SHSW-1#A4CF12F45678#2", &[])).unwrap();
        assert_eq!(parsed.model, "SHSW-1");
        assert_eq!(parsed.device_id, "A4CF12F45678");
        assert_eq!(parsed.revision.as_deref(), Some("2"));
    }

    #[test]
    fn parse_announce_with_token() {
        let parsed = parse_coiot_announce(&announce("SHDM-2#F45678#2", &[1, 2, 3, 4])).unwrap();
        assert_eq!(parsed.device_id, "F45678");
    }

    #[test]
    fn reject_foreign_datagrams() {
        assert!(parse_coiot_announce(&[]).is_none());
        assert!(parse_coiot_announce(b"hello world").is_none());
        // Valid CoAP header, no options
        assert!(parse_coiot_announce(&[0x50, 0x1e, 0, 1]).is_none());
    }

    #[test]
    fn device_from_announce() {
        let announce = CoiotAnnounce {
            model: "SHSW-1".to_string(),
            device_id: "A4CF12F45678".to_string(),
            revision: Some("2".to_string()),
        };
        let device = announce_to_device(&announce, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 77)));
        assert_eq!(device.name, "shsw-1-a4cf12f45678");
        assert_eq!(device.address.as_deref(), Some("192.168.1.77"));
        assert_eq!(device.generation, Generation::Gen1);
        assert_eq!(device.mac.unwrap().to_string(), "A4:CF:12:F4:56:78");
        assert!(device.provisioned);
    }
}
