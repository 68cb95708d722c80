//! Datagram transport layer
//!
//! Supports:
//! - UDP sockets (unicast and broadcast)
//! - In-memory datagram channels for simulation and tests

mod memory;
mod udp;

pub use memory::{Datagram, MemoryHandle, MemoryTransport};
pub use udp::{UdpConfig, UdpTransport};

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Largest datagram the receive loop accepts
pub const MAX_DATAGRAM: usize = 65_535;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// UDP socket
    Udp,
    /// In-memory channel
    Memory,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "UDP"),
            Self::Memory => write!(f, "Memory"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket could not be bound
    #[error("Bind failed on {addr}: {source}")]
    BindFailed {
        /// Requested local address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Transport closed
    #[error("Transport closed")]
    Closed,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Datagrams sent
    pub datagrams_sent: u64,
    /// Datagrams received
    pub datagrams_received: u64,
    /// Errors count
    pub errors: u64,
}

impl TransportStats {
    pub(crate) fn record_sent(&mut self, len: usize) {
        self.bytes_sent += len as u64;
        self.datagrams_sent += 1;
    }

    pub(crate) fn record_received(&mut self, len: usize) {
        self.bytes_received += len as u64;
        self.datagrams_received += 1;
    }
}

/// Datagram transport shared by every request in flight
///
/// Both directions take `&self`: one receive loop reads while any number of
/// workflows send.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram to `target`
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<usize, TransportError>;

    /// Receive one datagram into `buf`, returning its length and source
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError>;

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}
