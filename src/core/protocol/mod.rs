//! Terminal server management protocol
//!
//! UDP request/reply protocol on port 4800. Requests carry an 8-byte header
//! (see [`header`]) and, for device-scoped requests, the target's 12-byte
//! [`DeviceId`] as body prefix. Replies set the high bit of the request id.

pub mod device;
pub mod fields;
pub mod header;

pub use device::{DeviceId, MacAddress, DEVICE_ID_LEN};
pub use fields::{FieldError, FirmwareVersion};
pub use header::{FramingError, Header, Message, HEADER_LEN, REPLY_BIT};

/// Management protocol UDP port
pub const DEFAULT_PORT: u16 = 4800;

/// First request id that addresses a specific device
pub const FIRST_DEVICE_REQUEST: u8 = 0x02;

/// One past the last request id (ids are 7 bits)
pub const REQUEST_ID_END: u8 = REPLY_BIT - 1;

/// Reply id expected for `request_id`
pub fn reply_id(request_id: u8) -> u8 {
    REPLY_BIT | request_id
}

/// Known request ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Request {
    /// Broadcast self-identification (0x01)
    Discover = 0x01,
    /// Device name (0x10)
    DeviceName = 0x10,
    /// Firmware version and serial number (0x16)
    Firmware = 0x16,
    /// IPv4 address (0x21)
    Address = 0x21,
    /// IPv4 netmask (0x22)
    Netmask = 0x22,
    /// IPv4 gateway (0x23)
    Gateway = 0x23,
}

impl Request {
    /// Get request from u8
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Self::Discover),
            0x10 => Some(Self::DeviceName),
            0x16 => Some(Self::Firmware),
            0x21 => Some(Self::Address),
            0x22 => Some(Self::Netmask),
            0x23 => Some(Self::Gateway),
            _ => None,
        }
    }

    /// Wire id
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::DeviceName => "device name",
            Self::Firmware => "firmware",
            Self::Address => "address",
            Self::Netmask => "netmask",
            Self::Gateway => "gateway",
        }
    }
}
