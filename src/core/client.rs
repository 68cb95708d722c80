//! Request/reply client over a shared datagram transport
//!
//! One [`Client`] owns one transport and one [`Correlator`]. A background
//! receive loop decodes every inbound datagram and dispatches it; callers
//! only ever wait on their own slot or stream.

use crate::core::correlator::{Correlator, CorrelatorError, Dispatch, Inbound, Pending};
use crate::core::protocol::{reply_id, DeviceId, FramingError, Message, DEVICE_ID_LEN, REPLY_BIT};
use crate::core::transport::{DatagramTransport, TransportError, TransportStats, MAX_DATAGRAM};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rejection reported by a device through a nonzero status byte
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device {peer} rejected request 0x{request_id:02x} with status 0x{status:02x}")]
pub struct RemoteError {
    /// Request id that was rejected
    pub request_id: u8,
    /// Status byte from the reply
    pub status: u8,
    /// Replying device
    pub peer: SocketAddr,
}

/// Errors from a single request
#[derive(Error, Debug)]
pub enum RpcError {
    /// Reply matched our sequence number but carries another request id
    #[error("Protocol violation from {peer}: expected reply 0x{expected:02x}, got 0x{received:02x}")]
    ProtocolViolation {
        /// Expected reply id
        expected: u8,
        /// Received reply id
        received: u8,
        /// Replying device
        peer: SocketAddr,
    },

    /// Device answered with a nonzero status
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// No reply within the caller's budget
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// Client shut down or its receive loop ended
    #[error("Client closed")]
    Closed,

    /// Request id outside 0x01..=0x7f
    #[error("Invalid request id 0x{0:02x}")]
    InvalidRequestId(u8),

    /// Request could not be framed
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Sequence allocation failed
    #[error("Correlator error: {0}")]
    Correlator(#[from] CorrelatorError),

    /// Transport failed to send
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RpcError {
    /// Device stayed silent
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Device said no
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Successful reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply body, including the echoed device id where the device sends one
    pub body: Bytes,
    /// Replying device
    pub source: SocketAddr,
}

/// Counters kept by the receive loop
#[derive(Debug, Default)]
pub struct EngineStats {
    framing_errors: AtomicU64,
    unsolicited: AtomicU64,
    abandoned: AtomicU64,
    delivered: AtomicU64,
}

/// Snapshot of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    /// Malformed datagrams dropped
    pub framing_errors: u64,
    /// Replies without an owner
    pub unsolicited: u64,
    /// Replies whose owner had already left
    pub abandoned: u64,
    /// Replies delivered to a slot or stream
    pub delivered: u64,
}

impl EngineStats {
    fn record(&self, outcome: Dispatch) {
        let counter = match outcome {
            Dispatch::Resolved | Dispatch::Streamed => &self.delivered,
            Dispatch::Unsolicited => &self.unsolicited,
            Dispatch::Abandoned => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            unsolicited: self.unsolicited.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    transport: Arc<dyn DatagramTransport>,
    correlator: Arc<Correlator>,
    stats: Arc<EngineStats>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Protocol client; cheap to clone, all clones share one transport
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Start a client on `transport`
    ///
    /// Spawns the receive loop, so this must run inside a Tokio runtime.
    pub fn new(transport: Arc<dyn DatagramTransport>) -> Self {
        Self::with_correlator(transport, Correlator::new())
    }

    /// Start a client with a caller-supplied correlator
    pub fn with_correlator(transport: Arc<dyn DatagramTransport>, correlator: Correlator) -> Self {
        let correlator = Arc::new(correlator);
        let stats = Arc::new(EngineStats::default());
        let shutdown = CancellationToken::new();

        info!(transport = %transport.connection_info(), "Starting protocol client");

        tokio::spawn(receive_loop(
            Arc::clone(&transport),
            Arc::clone(&correlator),
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                transport,
                correlator,
                stats,
                shutdown,
            }),
        }
    }

    /// Send `request_id` to `target` and wait for its reply
    ///
    /// `device` is prepended to `body` for device-scoped requests. With
    /// `timeout` set to `None` the call waits until a reply arrives or the
    /// client closes; wrap it in an outer deadline where needed. The
    /// sequence number is released on every exit path, including the
    /// returned future being dropped.
    pub async fn request(
        &self,
        target: SocketAddr,
        request_id: u8,
        body: &[u8],
        device: Option<&DeviceId>,
        timeout: Option<Duration>,
    ) -> Result<Reply, RpcError> {
        if request_id == 0 || request_id & REPLY_BIT != 0 {
            return Err(RpcError::InvalidRequestId(request_id));
        }
        if self.is_closed() {
            return Err(RpcError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let registration = self.inner.correlator.register_next(Pending::Slot(tx))?;

        let mut payload = BytesMut::with_capacity(body.len() + device.map_or(0, |_| DEVICE_ID_LEN));
        if let Some(device) = device {
            payload.put_slice(device.as_bytes());
        }
        payload.put_slice(body);

        let message = Message::request(request_id, registration.sequence(), payload.freeze())?;
        self.send_message(&message, target).await?;

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| RpcError::Timeout(limit))?,
            None => rx.await,
        };
        drop(registration);
        let Inbound { message, source } = received.map_err(|_| RpcError::Closed)?;

        let expected = reply_id(request_id);
        if message.header.id != expected {
            return Err(RpcError::ProtocolViolation {
                expected,
                received: message.header.id,
                peer: source,
            });
        }
        if message.header.status != 0 {
            return Err(RemoteError {
                request_id,
                status: message.header.status,
                peer: source,
            }
            .into());
        }

        Ok(Reply {
            body: message.body,
            source,
        })
    }

    pub(crate) async fn send_message(&self, message: &Message, target: SocketAddr) -> Result<(), RpcError> {
        let datagram = message.encode();
        debug!(
            %target,
            sequence = message.header.sequence,
            frame = %hex::encode(&datagram),
            "Sending request"
        );
        self.inner.transport.send_to(&datagram, target).await?;
        Ok(())
    }

    pub(crate) fn correlator(&self) -> &Arc<Correlator> {
        &self.inner.correlator
    }

    /// Live correlator entries
    pub fn pending(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Receive-loop counters
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Transport counters
    pub fn transport_stats(&self) -> TransportStats {
        self.inner.transport.stats()
    }

    /// Stop the receive loop; pending requests fail with [`RpcError::Closed`]
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Whether the client has shut down
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

async fn receive_loop(
    transport: Arc<dyn DatagramTransport>,
    correlator: Arc<Correlator>,
    stats: Arc<EngineStats>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = transport.recv_from(&mut buf) => received,
        };

        let (len, source) = match received {
            Ok(received) => received,
            Err(TransportError::Closed) => {
                info!("Transport closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Receive failed");
                continue;
            }
        };

        let datagram = &buf[..len];
        debug!(%source, len, frame = %hex::encode(datagram), "Received datagram");

        match Message::decode_reply(datagram) {
            Ok(message) => {
                let outcome = correlator.dispatch(Inbound { message, source });
                stats.record(outcome);
            }
            Err(e) => {
                stats.framing_errors.fetch_add(1, Ordering::Relaxed);
                warn!(%source, error = %e, "Dropping malformed datagram");
            }
        }
    }

    shutdown.cancel();
    correlator.clear();
    debug!("Receive loop stopped");
}
