//! In-memory datagram transport
//!
//! The transport side behaves like a socket; the [`MemoryHandle`] side plays
//! the network: it sees every datagram sent and injects datagrams to be
//! received.

use super::{DatagramTransport, TransportError, TransportStats, TransportType};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::net::SocketAddr;
use tokio::sync::{mpsc, Mutex};

/// A datagram with its peer address
pub type Datagram = (Bytes, SocketAddr);

/// Transport over unbounded channels
pub struct MemoryTransport {
    local_addr: SocketAddr,
    inbound: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    outbound: mpsc::UnboundedSender<Datagram>,
    stats: RwLock<TransportStats>,
}

/// Network side of a [`MemoryTransport`]
pub struct MemoryHandle {
    local_addr: SocketAddr,
    inject: mpsc::UnboundedSender<Datagram>,
    sent: mpsc::UnboundedReceiver<Datagram>,
}

impl MemoryTransport {
    /// Create a transport bound to the fictitious `local_addr`
    pub fn new(local_addr: SocketAddr) -> (Self, MemoryHandle) {
        let (inject, inbound) = mpsc::unbounded_channel();
        let (outbound, sent) = mpsc::unbounded_channel();

        let transport = Self {
            local_addr,
            inbound: Mutex::new(inbound),
            outbound,
            stats: RwLock::new(TransportStats::default()),
        };
        let handle = MemoryHandle {
            local_addr,
            inject,
            sent,
        };
        (transport, handle)
    }
}

impl MemoryHandle {
    /// Address the transport appears to use
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Deliver `datagram` to the transport as if sent from `source`
    ///
    /// Returns `false` once the transport is gone.
    pub fn inject(&self, datagram: impl Into<Bytes>, source: SocketAddr) -> bool {
        self.inject.send((datagram.into(), source)).is_ok()
    }

    /// Next datagram the transport sent, with its destination
    pub async fn next_sent(&mut self) -> Option<Datagram> {
        self.sent.recv().await
    }

    /// Next sent datagram if one is already queued
    pub fn try_next_sent(&mut self) -> Option<Datagram> {
        self.sent.try_recv().ok()
    }

    /// Split into the injecting sender and the sent-datagram receiver
    pub fn into_parts(self) -> (mpsc::UnboundedSender<Datagram>, mpsc::UnboundedReceiver<Datagram>) {
        (self.inject, self.sent)
    }
}

#[async_trait]
impl DatagramTransport for MemoryTransport {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<usize, TransportError> {
        self.outbound
            .send((Bytes::copy_from_slice(datagram), target))
            .map_err(|_| TransportError::Closed)?;
        self.stats.write().record_sent(datagram.len());
        Ok(datagram.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        let (datagram, source) = self
            .inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)?;

        // Oversized datagrams are cut like a socket would
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        self.stats.write().record_received(n);
        Ok((n, source))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Memory
    }

    fn connection_info(&self) -> String {
        format!("memory://{}", self.local_addr)
    }

    fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_both_directions() {
        let (transport, mut handle) = MemoryTransport::new(addr("10.0.0.1:5000"));

        transport.send_to(b"ping", addr("10.0.0.255:4800")).await.unwrap();
        let (data, target) = handle.next_sent().await.unwrap();
        assert_eq!(data.as_ref(), b"ping");
        assert_eq!(target, addr("10.0.0.255:4800"));

        assert!(handle.inject(&b"pong"[..], addr("10.0.0.7:4800")));
        let mut buf = [0u8; 16];
        let (n, source) = transport.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(source, addr("10.0.0.7:4800"));
    }

    #[tokio::test]
    async fn test_closed_when_handle_dropped() {
        let (transport, handle) = MemoryTransport::new(addr("10.0.0.1:5000"));
        drop(handle);

        let mut buf = [0u8; 16];
        assert!(matches!(
            transport.recv_from(&mut buf).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.send_to(b"x", addr("10.0.0.2:4800")).await,
            Err(TransportError::Closed)
        ));
    }
}
