//! UDP transport implementation

use super::{DatagramTransport, TransportError, TransportStats, TransportType};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// UDP socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Local address to bind
    pub bind: SocketAddr,
    /// Allow sending to broadcast addresses
    pub broadcast: bool,
}

impl UdpConfig {
    /// Create a new UDP configuration
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            broadcast: true,
        }
    }

    /// Set broadcast permission
    #[must_use]
    pub fn broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }
}

/// UDP transport
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: RwLock<TransportStats>,
}

impl UdpTransport {
    /// Bind a socket according to `config`
    pub async fn bind(config: &UdpConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.bind)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: config.bind,
                source,
            })?;

        if config.broadcast {
            socket.set_broadcast(true)?;
        }

        let local_addr = socket.local_addr()?;
        tracing::debug!(%local_addr, broadcast = config.broadcast, "UDP socket bound");

        Ok(Self {
            socket,
            local_addr,
            stats: RwLock::new(TransportStats::default()),
        })
    }

    /// Local socket address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<usize, TransportError> {
        match self.socket.send_to(datagram, target).await {
            Ok(n) => {
                self.stats.write().record_sent(n);
                Ok(n)
            }
            Err(e) => {
                self.stats.write().errors += 1;
                Err(TransportError::IoError(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        match self.socket.recv_from(buf).await {
            Ok((n, source)) => {
                self.stats.write().record_received(n);
                Ok((n, source))
            }
            Err(e) => {
                self.stats.write().errors += 1;
                Err(TransportError::IoError(e))
            }
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Udp
    }

    fn connection_info(&self) -> String {
        format!("udp://{}", self.local_addr)
    }

    fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }
}
