//! Per-device results emitted by workflows

use crate::core::discovery::DiscoveredDevice;
use crate::core::protocol::{FirmwareVersion, MacAddress};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};

fn apid_hex<S: Serializer>(apid: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("0x{apid:08x}"))
}

/// Result of one probe in scan mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Device answered; body kept verbatim as hex
    Supported {
        /// Hex-encoded reply body
        payload: String,
    },
    /// Device rejected the request id
    Unsupported {
        /// Status byte from the reply
        code: u8,
    },
    /// Reply carried a different request id
    Invalid {
        /// Reply id received
        reply_id: u8,
    },
}

/// Raw catalog of a device's request-id space
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// Every probe in range was attempted
    pub complete: bool,
    /// Probed ids that produced a reply, keyed as `0x..`; silent ids are absent
    pub probes: BTreeMap<String, ProbeOutcome>,
}

impl ScanResult {
    /// Record the outcome for `request_id`
    pub fn insert(&mut self, request_id: u8, outcome: ProbeOutcome) {
        self.probes.insert(format!("0x{request_id:02x}"), outcome);
    }

    /// Outcome recorded for `request_id`
    pub fn get(&self, request_id: u8) -> Option<&ProbeOutcome> {
        self.probes.get(&format!("0x{request_id:02x}"))
    }
}

/// Structured summary fetched in query mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Configured device name
    pub name: String,
    /// Configured IPv4 address
    pub ip: Ipv4Addr,
    /// IPv4 netmask
    pub netmask: Ipv4Addr,
    /// IPv4 gateway
    pub gateway: Ipv4Addr,
    /// Firmware version
    pub firmware: FirmwareVersion,
    /// Serial number
    pub serial: u16,
}

/// Mode-specific part of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RecordDetails {
    /// Identity only
    Discover,
    /// Raw scan
    Scan(ScanResult),
    /// Structured query
    Query(DeviceInfo),
}

/// Everything learned about one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Application/product identifier
    #[serde(serialize_with = "apid_hex")]
    pub apid: u32,
    /// Hardware model, hex
    pub model: String,
    /// Hardware address
    pub mac: MacAddress,
    /// Address reported in the discovery reply
    pub address: Ipv4Addr,
    /// Address the discovery reply came from
    pub source: SocketAddr,
    /// Mode-specific results
    #[serde(flatten)]
    pub details: RecordDetails,
}

impl DeviceRecord {
    /// Record for `device` carrying `details`
    pub fn new(device: &DiscoveredDevice, details: RecordDetails) -> Self {
        Self {
            apid: device.device_id.apid(),
            model: device.device_id.model_hex(),
            mac: device.device_id.mac(),
            address: device.address,
            source: device.source,
            details,
        }
    }
}
