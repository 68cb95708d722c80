//! Raw scan: probe every device-scoped request id

use crate::core::client::{Client, RpcError};
use crate::core::discovery::DiscoveredDevice;
use crate::core::protocol::{FIRST_DEVICE_REQUEST, REQUEST_ID_END};
use crate::core::record::{DeviceRecord, ProbeOutcome, RecordDetails, ScanResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default budget for a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Scan parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Request ids to probe, in order
    pub range: Range<u8>,
    /// Budget for each probe
    pub probe_timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            range: FIRST_DEVICE_REQUEST..REQUEST_ID_END,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Probe `device` across `options.range`, one request at a time
///
/// Rejections and silence are expected and recorded rather than raised.
/// A transport failure or `cancel` ends the scan early; the partial record
/// is still returned with `complete` unset.
pub async fn scan_device(
    client: &Client,
    device: &DiscoveredDevice,
    options: &ScanOptions,
    cancel: &CancellationToken,
) -> DeviceRecord {
    let mut result = ScanResult::default();
    let complete = probe_all(client, device, options, cancel, &mut result).await;
    result.complete = complete;

    info!(
        device = %device.device_id,
        supported = result
            .probes
            .values()
            .filter(|p| matches!(p, ProbeOutcome::Supported { .. }))
            .count(),
        complete = result.complete,
        "Scan finished"
    );
    DeviceRecord::new(device, RecordDetails::Scan(result))
}

async fn probe_all(
    client: &Client,
    device: &DiscoveredDevice,
    options: &ScanOptions,
    cancel: &CancellationToken,
    result: &mut ScanResult,
) -> bool {
    for request_id in options.range.clone() {
        let probe = client.request(
            device.source,
            request_id,
            &[],
            Some(&device.device_id),
            Some(options.probe_timeout),
        );

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(device = %device.device_id, request_id, "Scan interrupted");
                return false;
            }
            outcome = probe => outcome,
        };

        match outcome {
            Ok(reply) => result.insert(
                request_id,
                ProbeOutcome::Supported {
                    payload: hex::encode(&reply.body),
                },
            ),
            Err(RpcError::Remote(e)) => {
                result.insert(request_id, ProbeOutcome::Unsupported { code: e.status });
            }
            Err(RpcError::Timeout(_)) => {
                debug!(device = %device.device_id, request_id, "No reply");
            }
            Err(RpcError::ProtocolViolation { received, .. }) => {
                warn!(device = %device.device_id, request_id, received, "Mismatched reply id");
                result.insert(request_id, ProbeOutcome::Invalid { reply_id: received });
            }
            Err(e) => {
                warn!(device = %device.device_id, request_id, error = %e, "Scan aborted");
                return false;
            }
        }
    }
    true
}
