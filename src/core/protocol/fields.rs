//! Fixed-offset field extraction from reply bodies

use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

use super::device::DEVICE_ID_LEN;

/// Reply bodies echo the device id before their data
pub const DATA_OFFSET: usize = DEVICE_ID_LEN;

/// Length of the zero-padded device name
pub const NAME_LEN: usize = 40;

/// Offset of the little-endian firmware version in a 0x96 body
pub const FIRMWARE_OFFSET: usize = DATA_OFFSET;

/// Offset of the little-endian serial number in a 0x96 body
pub const SERIAL_OFFSET: usize = DATA_OFFSET + 4;

/// Field extraction error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Body shorter than the field's end offset
    #[error("Payload too short: need {needed} bytes, got {actual}")]
    ShortPayload {
        /// Bytes required
        needed: usize,
        /// Bytes present
        actual: usize,
    },
}

fn slice(body: &[u8], offset: usize, len: usize) -> Result<&[u8], FieldError> {
    body.get(offset..offset + len).ok_or(FieldError::ShortPayload {
        needed: offset + len,
        actual: body.len(),
    })
}

/// Zero-padded ASCII string; non-ASCII bytes are replaced
pub fn ascii(body: &[u8], offset: usize, len: usize) -> Result<String, FieldError> {
    let raw = slice(body, offset, len)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Big-endian IPv4 address
pub fn ipv4(body: &[u8], offset: usize) -> Result<Ipv4Addr, FieldError> {
    let raw = slice(body, offset, 4)?;
    Ok(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
}

/// Little-endian u32
pub fn u32_le(body: &[u8], offset: usize) -> Result<u32, FieldError> {
    let raw = slice(body, offset, 4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Little-endian u16
pub fn u16_le(body: &[u8], offset: usize) -> Result<u16, FieldError> {
    let raw = slice(body, offset, 2)?;
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
}

/// Firmware version word, most significant byte first: `major.minor.patch`
///
/// The low byte is a build counter and is not shown.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion(pub u32);

impl FirmwareVersion {
    /// Major component
    pub fn major(&self) -> u8 {
        self.0.to_be_bytes()[0]
    }

    /// Minor component
    pub fn minor(&self) -> u8 {
        self.0.to_be_bytes()[1]
    }

    /// Patch component
    pub fn patch(&self) -> u8 {
        self.0.to_be_bytes()[2]
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

impl fmt::Debug for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FirmwareVersion({self}, 0x{:08x})", self.0)
    }
}

impl serde::Serialize for FirmwareVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_trims_padding() {
        let mut body = vec![0u8; DATA_OFFSET];
        body.extend_from_slice(b"NP5110_1234");
        body.resize(DATA_OFFSET + NAME_LEN, 0);
        assert_eq!(ascii(&body, DATA_OFFSET, NAME_LEN).unwrap(), "NP5110_1234");
    }

    #[test]
    fn test_ascii_full_width() {
        let body = [b'A'; NAME_LEN];
        assert_eq!(ascii(&body, 0, NAME_LEN).unwrap().len(), NAME_LEN);
    }

    #[test]
    fn test_ipv4_is_big_endian() {
        let body = [0xc0, 0xa8, 0x7f, 0xfe];
        assert_eq!(ipv4(&body, 0).unwrap(), Ipv4Addr::new(192, 168, 127, 254));
    }

    #[test]
    fn test_little_endian_integers() {
        let body = [0x00, 0x00, 0x07, 0x03, 0x39, 0x05];
        assert_eq!(u32_le(&body, 0).unwrap(), 0x0307_0000);
        assert_eq!(u16_le(&body, 4).unwrap(), 1337);
    }

    #[test]
    fn test_short_payload() {
        assert_eq!(
            ipv4(&[0u8; 14], DATA_OFFSET),
            Err(FieldError::ShortPayload { needed: 16, actual: 14 })
        );
    }

    #[test]
    fn test_firmware_display() {
        assert_eq!(FirmwareVersion(0x0307_0000).to_string(), "3.7.0");
        assert_eq!(FirmwareVersion(0x0100_0a12).to_string(), "1.0.10");
    }
}
