//! Broadcast discovery
//!
//! One discovery request may be answered by any number of devices, at any
//! time, so its sequence number is registered as a stream rather than a
//! slot. The stream never ends on its own; dropping it releases the
//! sequence number.

use crate::core::client::{Client, RpcError};
use crate::core::correlator::{Inbound, Pending, Registration};
use crate::core::protocol::fields::{self, FieldError};
use crate::core::protocol::{reply_id, DeviceId, Message, Request, DEVICE_ID_LEN};
use bytes::Bytes;
use futures::Stream;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

/// Replies to one discovery broadcast, in arrival order
pub struct DiscoveryStream {
    replies: mpsc::UnboundedReceiver<Inbound>,
    registration: Registration,
}

impl DiscoveryStream {
    /// Sequence number of the discovery request
    pub fn sequence(&self) -> u32 {
        self.registration.sequence()
    }

    /// Next reply; `None` only once the client has shut down
    pub async fn next_reply(&mut self) -> Option<Inbound> {
        self.replies.recv().await
    }
}

impl Stream for DiscoveryStream {
    type Item = Inbound;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().replies.poll_recv(cx)
    }
}

impl Client {
    /// Broadcast (or unicast) a discovery request to `target`
    ///
    /// Every reply carrying the request's sequence number is appended to
    /// the returned stream. Duplicates are not filtered.
    pub async fn discover(&self, target: SocketAddr) -> Result<DiscoveryStream, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }

        let (tx, replies) = mpsc::unbounded_channel();
        let registration = self.correlator().register_next(Pending::Stream(tx))?;

        let message = Message::request(Request::Discover.id(), registration.sequence(), Bytes::new())?;
        self.send_message(&message, target).await?;
        info!(%target, sequence = registration.sequence(), "Discovery request sent");

        Ok(DiscoveryStream {
            replies,
            registration,
        })
    }
}

/// Discovery reply validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Reply id is not 0x81
    #[error("Unexpected reply id 0x{0:02x} to discovery")]
    UnexpectedId(u8),

    /// Device rejected discovery
    #[error("Discovery rejected with status 0x{0:02x}")]
    Rejected(u8),

    /// Body too short for device id and address
    #[error("Malformed discovery payload: {0}")]
    Payload(#[from] FieldError),
}

/// A device that answered discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveredDevice {
    /// Identifier to echo in later requests
    pub device_id: DeviceId,
    /// Address the device reports for itself
    pub address: Ipv4Addr,
    /// Address the reply came from
    pub source: SocketAddr,
}

impl DiscoveredDevice {
    /// Interpret a discovery reply: device id (12 bytes) then IPv4 (BE)
    pub fn parse(inbound: &Inbound) -> Result<Self, DiscoveryError> {
        let header = inbound.message.header;
        if header.id != reply_id(Request::Discover.id()) {
            return Err(DiscoveryError::UnexpectedId(header.id));
        }
        if header.status != 0 {
            return Err(DiscoveryError::Rejected(header.status));
        }

        let body = &inbound.message.body;
        let address = fields::ipv4(body, DEVICE_ID_LEN)?;
        let device_id = DeviceId::from_slice(body).ok_or(FieldError::ShortPayload {
            needed: DEVICE_ID_LEN,
            actual: body.len(),
        })?;

        Ok(Self {
            device_id,
            address,
            source: inbound.source,
        })
    }

    /// Build the discovery reply this device would send
    pub fn to_reply_body(&self) -> Bytes {
        let mut body = Vec::with_capacity(DEVICE_ID_LEN + 4);
        body.extend_from_slice(self.device_id.as_bytes());
        body.extend_from_slice(&self.address.octets());
        Bytes::from(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::correlator::Correlator;
    use crate::core::transport::MemoryTransport;
    use futures::StreamExt;
    use std::sync::Arc;

    fn inbound(hex_frame: &str, source: &str) -> Inbound {
        Inbound {
            message: Message::decode(&hex::decode(hex_frame).unwrap()).unwrap(),
            source: source.parse().unwrap(),
        }
    }

    #[test]
    fn test_parse_reference_reply() {
        let reply = inbound(
            "8100001800000001005555551a510090e8aaaaaac0a87ffe",
            "192.168.127.254:4800",
        );
        let device = DiscoveredDevice::parse(&reply).unwrap();
        assert_eq!(device.device_id.apid(), 0x0055_5555);
        assert_eq!(device.device_id.model_hex(), "1a51");
        assert_eq!(device.device_id.mac().to_string(), "00:90:e8:aa:aa:aa");
        assert_eq!(device.address, Ipv4Addr::new(192, 168, 127, 254));
        assert_eq!(device.to_reply_body(), reply.message.body);
    }

    #[test]
    fn test_parse_short_body() {
        let reply = inbound("8100001000000001005555551a510090", "10.0.0.2:4800");
        assert!(matches!(
            DiscoveredDevice::parse(&reply),
            Err(DiscoveryError::Payload(FieldError::ShortPayload { .. }))
        ));
    }

    #[test]
    fn test_parse_rejected() {
        let reply = inbound("8104000800000001", "10.0.0.2:4800");
        assert_eq!(DiscoveredDevice::parse(&reply), Err(DiscoveryError::Rejected(0x04)));
    }

    #[tokio::test]
    async fn test_stream_yields_each_reply_in_order() {
        let (transport, mut handle) = MemoryTransport::new("10.0.0.1:40000".parse().unwrap());
        let client = Client::with_correlator(Arc::new(transport), Correlator::with_cursor(1));

        let mut stream = client.discover("10.0.0.255:4800".parse().unwrap()).await.unwrap();
        let (request, target) = handle.next_sent().await.unwrap();
        assert_eq!(hex::encode(&request), "0100000800000001");
        assert_eq!(target.port(), 4800);

        let good = "8100001800000001005555551a510090e8aaaaaac0a87ffe";
        handle.inject(hex::decode(good).unwrap(), "10.0.0.7:4800".parse().unwrap());
        // Truncated: declared 0x18, only 12 bytes
        handle.inject(hex::decode("810000180000000100555555").unwrap(), "10.0.0.8:4800".parse().unwrap());
        handle.inject(hex::decode(good).unwrap(), "10.0.0.9:4800".parse().unwrap());

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.source, "10.0.0.7:4800".parse().unwrap());
        assert_eq!(second.source, "10.0.0.9:4800".parse().unwrap());
        assert_eq!(client.pending(), 1);

        drop(stream);
        assert_eq!(client.pending(), 0);
    }
}
