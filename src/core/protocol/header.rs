//! Message framing
//!
//! Every datagram starts with an 8-byte header:
//!
//! ```text
//! +--------+--------+-----------------+-----------------------------------+
//! |   id   | status |  length (BE16)  |          sequence (BE32)          |
//! +--------+--------+-----------------+-----------------------------------+
//! ```
//!
//! The high bit of `id` marks a reply. `length` counts the header and body.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the fixed header
pub const HEADER_LEN: usize = 8;

/// Direction bit set on every reply id
pub const REPLY_BIT: u8 = 0x80;

/// Largest body that still fits the 16-bit length field
pub const MAX_BODY_LEN: usize = u16::MAX as usize - HEADER_LEN;

/// Framing errors
///
/// These never reach a waiting caller: the receive loop logs and drops the
/// datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Fewer bytes than the header or the declared length require
    #[error("Truncated datagram: {received} bytes received, {expected} expected")]
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes received
        received: usize,
    },

    /// Declared length smaller than the header itself
    #[error("Invalid length field: {0}")]
    BadLength(u16),

    /// Direction bit not set on an inbound datagram
    #[error("Not a reply (id 0x{0:02x})")]
    NotAReply(u8),

    /// Body does not fit the length field
    #[error("Body too large: {0} bytes")]
    Oversized(usize),
}

/// Decoded header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request id including the direction bit
    pub id: u8,
    /// Status byte, 0 on success
    pub status: u8,
    /// Total message length (header + body)
    pub length: u16,
    /// Transaction number echoed from request to reply
    pub sequence: u32,
}

impl Header {
    /// Request id without the direction bit
    pub fn request_id(&self) -> u8 {
        self.id & !REPLY_BIT
    }

    /// Whether the direction bit is set
    pub fn is_reply(&self) -> bool {
        self.id & REPLY_BIT != 0
    }

    /// Serialize to wire order
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.id;
        out[1] = self.status;
        out[2..4].copy_from_slice(&self.length.to_be_bytes());
        out[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    /// Parse the first 8 bytes of a datagram
    pub fn parse(data: &[u8]) -> Result<Self, FramingError> {
        if data.len() < HEADER_LEN {
            return Err(FramingError::Truncated {
                expected: HEADER_LEN,
                received: data.len(),
            });
        }

        Ok(Self {
            id: data[0],
            status: data[1],
            length: u16::from_be_bytes([data[2], data[3]]),
            sequence: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// A framed message: header plus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Header as sent or received
    pub header: Header,
    /// Body following the header
    pub body: Bytes,
}

impl Message {
    /// Build a request with a computed length field
    pub fn request(id: u8, sequence: u32, body: Bytes) -> Result<Self, FramingError> {
        Self::build(id & !REPLY_BIT, 0, sequence, body)
    }

    /// Build a reply to `request_id`
    pub fn reply(request_id: u8, status: u8, sequence: u32, body: Bytes) -> Result<Self, FramingError> {
        Self::build(request_id | REPLY_BIT, status, sequence, body)
    }

    fn build(id: u8, status: u8, sequence: u32, body: Bytes) -> Result<Self, FramingError> {
        if body.len() > MAX_BODY_LEN {
            return Err(FramingError::Oversized(body.len()));
        }

        // Bounded by MAX_BODY_LEN above
        #[allow(clippy::cast_possible_truncation)]
        let length = (HEADER_LEN + body.len()) as u16;

        Ok(Self {
            header: Header {
                id,
                status,
                length,
                sequence,
            },
            body,
        })
    }

    /// Encode header and body into one datagram
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        buf.put_slice(&self.header.to_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decode a datagram of either direction
    ///
    /// Bytes past the declared length are trimmed.
    pub fn decode(datagram: &[u8]) -> Result<Self, FramingError> {
        let header = Header::parse(datagram)?;
        let declared = usize::from(header.length);

        if declared < HEADER_LEN {
            return Err(FramingError::BadLength(header.length));
        }
        if declared > datagram.len() {
            return Err(FramingError::Truncated {
                expected: declared,
                received: datagram.len(),
            });
        }
        if declared < datagram.len() {
            tracing::warn!(
                declared,
                received = datagram.len(),
                sequence = header.sequence,
                "Trimming excess bytes after declared length"
            );
        }

        Ok(Self {
            header,
            body: Bytes::copy_from_slice(&datagram[HEADER_LEN..declared]),
        })
    }

    /// Decode a datagram that must be a reply
    pub fn decode_reply(datagram: &[u8]) -> Result<Self, FramingError> {
        let message = Self::decode(datagram)?;
        if !message.header.is_reply() {
            return Err(FramingError::NotAReply(message.header.id));
        }
        Ok(message)
    }
}
