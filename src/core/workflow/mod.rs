//! Per-device workflows
//!
//! Each discovered device gets one workflow task:
//! - [`Mode::Discover`] reports the identity from the discovery reply
//! - [`Mode::Scan`] probes the request-id space and catalogs raw replies
//! - [`Mode::Query`] fetches the known fields into a structured record

pub mod query;
pub mod scan;

pub use query::{query_device, QueryError};
pub use scan::{scan_device, ScanOptions, DEFAULT_PROBE_TIMEOUT};

use crate::core::client::Client;
use crate::core::discovery::DiscoveredDevice;
use crate::core::record::{DeviceRecord, RecordDetails};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What to do with each discovered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Identity only
    Discover,
    /// Raw scan
    Scan(ScanOptions),
    /// Structured query
    Query,
}

impl Mode {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Scan(_) => "scan",
            Self::Query => "query",
        }
    }
}

/// How a workflow ended
#[derive(Debug)]
pub enum WorkflowOutcome {
    /// A record is ready for the sink
    Emitted(DeviceRecord),
    /// Query failed; nothing to emit
    Failed(QueryError),
    /// Cancelled before producing anything
    Cancelled,
}

/// Run the workflow for `mode` against `device` until done or cancelled
///
/// A cancelled scan still yields its partial record; a cancelled query
/// yields nothing.
pub async fn run(client: Client, device: DiscoveredDevice, mode: Mode, cancel: CancellationToken) -> WorkflowOutcome {
    match mode {
        Mode::Discover => WorkflowOutcome::Emitted(DeviceRecord::new(&device, RecordDetails::Discover)),
        Mode::Scan(options) => {
            WorkflowOutcome::Emitted(scan_device(&client, &device, &options, &cancel).await)
        }
        Mode::Query => {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(device = %device.device_id, "Query cancelled");
                    WorkflowOutcome::Cancelled
                }
                result = query_device(&client, &device) => match result {
                    Ok(record) => WorkflowOutcome::Emitted(record),
                    Err(e) => {
                        warn!(device = %device.device_id, error = %e, "Query failed");
                        WorkflowOutcome::Failed(e)
                    }
                },
            }
        }
    }
}
