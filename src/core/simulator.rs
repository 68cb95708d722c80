//! Simulated terminal server
//!
//! Answers the management protocol the way a real unit does: discovery,
//! the known query fields, and a configurable status for everything else.
//! Rejections, silence, raw payloads and reply latency are scriptable so
//! workflows can be exercised without hardware.

use crate::core::discovery::DiscoveredDevice;
use crate::core::protocol::fields::NAME_LEN;
use crate::core::protocol::{DeviceId, MacAddress, Message, Request};
use crate::core::transport::{
    DatagramTransport, MemoryHandle, TransportError, UdpConfig, UdpTransport, MAX_DATAGRAM,
};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Status returned for request ids the device does not implement
pub const UNSUPPORTED_STATUS: u8 = 0x04;

/// Identity and settings a simulated device reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Device name (truncated to 40 bytes on the wire)
    pub name: String,
    /// Application/product identifier
    pub apid: u32,
    /// Hardware model
    pub model: u16,
    /// Hardware address
    pub mac: MacAddress,
    /// IPv4 address
    pub address: Ipv4Addr,
    /// IPv4 netmask
    pub netmask: Ipv4Addr,
    /// IPv4 gateway
    pub gateway: Ipv4Addr,
    /// Firmware version word
    pub firmware: u32,
    /// Serial number
    pub serial: u16,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            name: "NP5110_1337".to_string(),
            apid: 0x0055_5555,
            model: 0x1a51,
            mac: MacAddress([0x00, 0x90, 0xe8, 0xaa, 0xaa, 0xaa]),
            address: Ipv4Addr::new(192, 168, 127, 254),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 127, 1),
            firmware: 0x0307_0000,
            serial: 1337,
        }
    }
}

/// Virtual device answering protocol requests
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    profile: DeviceProfile,
    rejected: HashMap<u8, u8>,
    silent: HashSet<u8>,
    payloads: HashMap<u8, Bytes>,
    latency: Duration,
}

impl SimulatedDevice {
    /// Create a device reporting `profile`
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            rejected: HashMap::new(),
            silent: HashSet::new(),
            payloads: HashMap::new(),
            latency: Duration::ZERO,
        }
    }

    /// Reject `request_id` with `status`
    #[must_use]
    pub fn reject(mut self, request_id: u8, status: u8) -> Self {
        self.rejected.insert(request_id, status);
        self
    }

    /// Never answer `request_id`
    #[must_use]
    pub fn silence(mut self, request_id: u8) -> Self {
        self.silent.insert(request_id);
        self
    }

    /// Answer `request_id` with `data` after the echoed device id
    #[must_use]
    pub fn with_payload(mut self, request_id: u8, data: impl Into<Bytes>) -> Self {
        self.payloads.insert(request_id, data.into());
        self
    }

    /// Delay every reply by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reported profile
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Identifier the device answers to
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.profile.apid, self.profile.model, self.profile.mac)
    }

    /// Reply latency
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Reply to one request datagram, if the device would answer it
    ///
    /// Device-scoped requests addressed to another device id are ignored.
    pub fn respond(&self, datagram: &[u8]) -> Option<Bytes> {
        let request = match Message::decode(datagram) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Simulator ignoring malformed request");
                return None;
            }
        };
        if request.header.is_reply() {
            return None;
        }

        let request_id = request.header.request_id();
        let sequence = request.header.sequence;
        if self.silent.contains(&request_id) {
            return None;
        }

        let device_id = self.device_id();
        if request_id == Request::Discover.id() {
            let identity = DiscoveredDevice {
                device_id,
                address: self.profile.address,
                source: SocketAddr::new(IpAddr::V4(self.profile.address), 0),
            };
            return reply(request_id, 0, sequence, identity.to_reply_body());
        }

        if DeviceId::from_slice(&request.body) != Some(device_id) {
            return None;
        }

        let mut body = device_id.as_bytes().to_vec();
        if let Some(&status) = self.rejected.get(&request_id) {
            return reply(request_id, status, sequence, Bytes::from(body));
        }

        if let Some(data) = self.payloads.get(&request_id) {
            body.extend_from_slice(data);
        } else {
            match Request::from_u8(request_id) {
                Some(Request::DeviceName) => {
                    let mut name = self.profile.name.as_bytes().to_vec();
                    name.resize(NAME_LEN, 0);
                    body.extend_from_slice(&name);
                }
                Some(Request::Address) => body.extend_from_slice(&self.profile.address.octets()),
                Some(Request::Netmask) => body.extend_from_slice(&self.profile.netmask.octets()),
                Some(Request::Gateway) => body.extend_from_slice(&self.profile.gateway.octets()),
                Some(Request::Firmware) => {
                    body.extend_from_slice(&self.profile.firmware.to_le_bytes());
                    body.extend_from_slice(&self.profile.serial.to_le_bytes());
                }
                _ => return reply(request_id, UNSUPPORTED_STATUS, sequence, Bytes::from(body)),
            }
        }

        reply(request_id, 0, sequence, Bytes::from(body))
    }
}

fn reply(request_id: u8, status: u8, sequence: u32, body: Bytes) -> Option<Bytes> {
    Message::reply(request_id, status, sequence, body)
        .ok()
        .map(|message| message.encode())
}

/// Whether a datagram sent to `target` reaches a device at `device`
fn reaches(target: SocketAddr, device: SocketAddr) -> bool {
    if target == device {
        return true;
    }
    let broadcast = match target.ip() {
        IpAddr::V4(ip) => ip.is_broadcast() || ip.octets()[3] == 255,
        IpAddr::V6(_) => false,
    };
    broadcast && target.port() == device.port()
}

/// Serve `devices`, each at its own address, behind a memory transport
///
/// Runs until the transport side is dropped.
pub fn spawn_network(handle: MemoryHandle, devices: Vec<(SocketAddr, SimulatedDevice)>) -> JoinHandle<()> {
    let (inject, mut sent) = handle.into_parts();

    tokio::spawn(async move {
        while let Some((datagram, target)) = sent.recv().await {
            for (addr, device) in &devices {
                if !reaches(target, *addr) {
                    continue;
                }
                let Some(answer) = device.respond(&datagram) else {
                    continue;
                };

                let from = *addr;
                let latency = device.latency();
                if latency.is_zero() {
                    let _ = inject.send((answer, from));
                } else {
                    let inject = inject.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(latency).await;
                        let _ = inject.send((answer, from));
                    });
                }
            }
        }
    })
}

/// Answer requests arriving on `transport` until `cancel` fires
pub async fn serve(
    device: &SimulatedDevice,
    transport: Arc<dyn DatagramTransport>,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, peer) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = transport.recv_from(&mut buf) => received?,
        };

        if let Some(answer) = device.respond(&buf[..len]) {
            if !device.latency().is_zero() {
                tokio::time::sleep(device.latency()).await;
            }
            debug!(%peer, frame = %hex::encode(&answer), "Simulator replying");
            transport.send_to(&answer, peer).await?;
        }
    }

    info!("Simulated device stopped");
    Ok(())
}

/// Bind a UDP socket at `bind` and serve `device` on it
pub async fn serve_udp(
    device: &SimulatedDevice,
    bind: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let transport = UdpTransport::bind(&UdpConfig::new(bind)).await?;
    info!(
        local = %transport.local_addr(),
        device = %device.device_id(),
        name = %device.profile().name,
        "Simulated device listening"
    );
    serve(device, Arc::new(transport), cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::fields;

    fn request(id: u8, sequence: u32, device: Option<DeviceId>) -> Vec<u8> {
        let body = device.map_or_else(Bytes::new, |d| Bytes::copy_from_slice(d.as_bytes()));
        Message::request(id, sequence, body).unwrap().encode().to_vec()
    }

    #[test]
    fn test_discovery_reply_matches_reference() {
        let device = SimulatedDevice::new(DeviceProfile::default());
        let reply = device.respond(&request(0x01, 1, None)).unwrap();
        assert_eq!(
            hex::encode(reply),
            "8100001800000001005555551a510090e8aaaaaac0a87ffe"
        );
    }

    #[test]
    fn test_known_fields() {
        let device = SimulatedDevice::new(DeviceProfile::default());
        let id = Some(device.device_id());

        let name = Message::decode(&device.respond(&request(0x10, 2, id)).unwrap()).unwrap();
        assert_eq!(name.header.id, 0x90);
        assert_eq!(fields::ascii(&name.body, 12, NAME_LEN).unwrap(), "NP5110_1337");

        let fw = Message::decode(&device.respond(&request(0x16, 3, id)).unwrap()).unwrap();
        assert_eq!(fields::u32_le(&fw.body, 12).unwrap(), 0x0307_0000);
        assert_eq!(fields::u16_le(&fw.body, 16).unwrap(), 1337);
    }

    #[test]
    fn test_unknown_id_rejected_and_overrides() {
        let device = SimulatedDevice::new(DeviceProfile::default())
            .reject(0x21, 0x07)
            .silence(0x22)
            .with_payload(0x40, &b"\x01\x02"[..]);
        let id = Some(device.device_id());

        let unknown = Message::decode(&device.respond(&request(0x05, 4, id)).unwrap()).unwrap();
        assert_eq!(unknown.header.status, UNSUPPORTED_STATUS);

        let rejected = Message::decode(&device.respond(&request(0x21, 5, id)).unwrap()).unwrap();
        assert_eq!(rejected.header.status, 0x07);

        assert!(device.respond(&request(0x22, 6, id)).is_none());

        let raw = Message::decode(&device.respond(&request(0x40, 7, id)).unwrap()).unwrap();
        assert_eq!(&raw.body[12..], &[0x01, 0x02]);
    }

    #[test]
    fn test_ignores_other_devices() {
        let device = SimulatedDevice::new(DeviceProfile::default());
        let other = DeviceId::new(1, 2, MacAddress([0; 6]));
        assert!(device.respond(&request(0x10, 8, Some(other))).is_none());
        assert!(device.respond(&request(0x10, 9, None)).is_none());
    }

    #[test]
    fn test_broadcast_reach() {
        let device: SocketAddr = "10.0.0.7:4800".parse().unwrap();
        assert!(reaches("255.255.255.255:4800".parse().unwrap(), device));
        assert!(reaches("10.0.0.255:4800".parse().unwrap(), device));
        assert!(reaches(device, device));
        assert!(!reaches("10.0.0.8:4800".parse().unwrap(), device));
        assert!(!reaches("255.255.255.255:4801".parse().unwrap(), device));
    }
}
