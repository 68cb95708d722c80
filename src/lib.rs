//! # tsprobe Core Library
//!
//! Discovery and interrogation of serial-to-Ethernet terminal servers over
//! their UDP management protocol (port 4800).
//!
//! ## Features
//!
//! - Big-endian request/reply framing with sequence-number correlation
//! - Broadcast discovery with any number of concurrent responders
//! - Request/reply client with optional timeouts and status classification
//! - Raw scan of a device's request-id space
//! - Structured query of name, addresses, firmware and serial
//! - Deadline-bounded runs with cooperative cancellation
//! - Simulated devices for tests and demos
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsprobe_core::{Client, Mode, Orchestrator, OrchestratorConfig, UdpConfig, UdpTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = UdpTransport::bind(&UdpConfig::default().broadcast(true)).await?;
//!     let client = Client::new(Arc::new(transport));
//!     let orchestrator = Orchestrator::new(client, OrchestratorConfig::default());
//!
//!     let mut records = Vec::new();
//!     let summary = orchestrator.run(Mode::Query, &mut records).await?;
//!     println!("{} devices, {} records", summary.discovered, records.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat, RecordWriter};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::client::{Client, RemoteError, Reply, RpcError};
pub use crate::core::correlator::{Correlator, Registration};
pub use crate::core::discovery::{DiscoveredDevice, DiscoveryStream};
pub use crate::core::orchestrator::{
    DuplicatePolicy, Orchestrator, OrchestratorConfig, RecordSink, RunError, RunSummary,
};
pub use crate::core::protocol::{DeviceId, Header, MacAddress, Message, Request};
pub use crate::core::record::{DeviceInfo, DeviceRecord, ProbeOutcome, RecordDetails, ScanResult};
pub use crate::core::simulator::{DeviceProfile, SimulatedDevice};
pub use crate::core::transport::{
    DatagramTransport, MemoryTransport, TransportError, TransportType, UdpConfig, UdpTransport,
};
pub use crate::core::workflow::{Mode, ScanOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
