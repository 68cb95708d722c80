//! Device identity as carried on the wire

use serde::{Serialize, Serializer};
use std::fmt;

/// Length of the identifier echoed in every device-scoped request
pub const DEVICE_ID_LEN: usize = 12;

/// 48-bit hardware address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::str::FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| !matches!(c, ':' | '-')).collect();
        let bytes = hex::decode(&digits).map_err(|e| format!("invalid MAC address {s}: {e}"))?;
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| format!("invalid MAC address {s}: expected 6 octets"))?;
        Ok(Self(octets))
    }
}

/// Opaque 12-byte identifier: APID (BE32), model (BE16), MAC
///
/// Captured from a discovery reply and echoed byte-for-byte afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId([u8; DEVICE_ID_LEN]);

impl DeviceId {
    /// Assemble from its fields
    pub fn new(apid: u32, model: u16, mac: MacAddress) -> Self {
        let mut raw = [0u8; DEVICE_ID_LEN];
        raw[0..4].copy_from_slice(&apid.to_be_bytes());
        raw[4..6].copy_from_slice(&model.to_be_bytes());
        raw[6..12].copy_from_slice(&mac.0);
        Self(raw)
    }

    /// Take the first 12 bytes of `data`
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.get(..DEVICE_ID_LEN)
            .and_then(|raw| raw.try_into().ok())
            .map(Self)
    }

    /// Raw bytes as echoed in requests
    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.0
    }

    /// Application/product identifier
    pub fn apid(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Hardware model id
    pub fn model(&self) -> u16 {
        u16::from_be_bytes([self.0[4], self.0[5]])
    }

    /// Model rendered the way vendor tools print it (`1a51`)
    pub fn model_hex(&self) -> String {
        format!("{:04x}", self.model())
    }

    /// Hardware address
    pub fn mac(&self) -> MacAddress {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.0[6..12]);
        MacAddress(mac)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}/{}/{}", self.apid(), self.model_hex(), self.mac())
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields() {
        let raw = hex::decode("005555551a510090e8aaaaaa").unwrap();
        let id = DeviceId::from_slice(&raw).unwrap();
        assert_eq!(id.apid(), 0x0055_5555);
        assert_eq!(id.model(), 0x1a51);
        assert_eq!(id.model_hex(), "1a51");
        assert_eq!(id.mac().to_string(), "00:90:e8:aa:aa:aa");
        assert_eq!(id.as_bytes().as_slice(), raw.as_slice());
    }

    #[test]
    fn test_new_matches_wire_layout() {
        let mac: MacAddress = "00:90:e8:aa:aa:aa".parse().unwrap();
        let id = DeviceId::new(0x0055_5555, 0x1a51, mac);
        assert_eq!(hex::encode(id.as_bytes()), "005555551a510090e8aaaaaa");
    }

    #[test]
    fn test_short_slice() {
        assert!(DeviceId::from_slice(&[0u8; 11]).is_none());
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("00:90:e8".parse::<MacAddress>().is_err());
        assert!("zz:90:e8:aa:aa:aa".parse::<MacAddress>().is_err());
        assert_eq!(
            "00-90-E8-01-02-03".parse::<MacAddress>().unwrap().to_string(),
            "00:90:e8:01:02:03"
        );
    }
}
