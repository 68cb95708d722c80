//! Run orchestration
//!
//! One run = one discovery broadcast plus one workflow per reply, all under
//! a single governing deadline. When the deadline passes (or the external
//! token fires) discovery stops, every workflow is cancelled, and the task
//! set is drained so partial scan records still reach the sink.

use crate::core::client::{Client, RpcError};
use crate::core::discovery::DiscoveredDevice;
use crate::core::protocol::{DeviceId, DEFAULT_PORT};
use crate::core::record::DeviceRecord;
use crate::core::workflow::{self, Mode, WorkflowOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default governing deadline for a run
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Destination for finished device records
pub trait RecordSink: Send {
    /// Accept one record
    fn emit(&mut self, record: &DeviceRecord) -> io::Result<()>;
}

impl RecordSink for Vec<DeviceRecord> {
    fn emit(&mut self, record: &DeviceRecord) -> io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// What to do when the same device answers discovery more than once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Every reply gets its own workflow
    #[default]
    Spawn,
    /// Only the first reply per device id gets a workflow
    Ignore,
}

/// Run parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Discovery destination, usually a broadcast address
    pub target: SocketAddr,
    /// Governing deadline for the whole run
    pub wait: Duration,
    /// Duplicate reply handling
    pub duplicates: DuplicatePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::BROADCAST, DEFAULT_PORT)),
            wait: DEFAULT_WAIT,
            duplicates: DuplicatePolicy::default(),
        }
    }
}

/// Counters for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Valid discovery replies received
    pub discovered: usize,
    /// Replies skipped under [`DuplicatePolicy::Ignore`]
    pub duplicates: usize,
    /// Records handed to the sink
    pub emitted: usize,
    /// Workflows that failed
    pub failed: usize,
    /// Workflows cancelled before producing a record
    pub cancelled: usize,
}

/// Run-level failures
#[derive(Error, Debug)]
pub enum RunError {
    /// Discovery could not be started
    #[error("Discovery failed: {0}")]
    Discovery(#[from] RpcError),

    /// The sink rejected a record
    #[error("Output failed: {0}")]
    Sink(#[from] io::Error),
}

/// Drives discovery and per-device workflows for one run
pub struct Orchestrator {
    client: Client,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator over `client`
    pub fn new(client: Client, config: OrchestratorConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run parameters
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Token that interrupts the run early, as the deadline would
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Discover devices and run `mode` against each until the deadline
    pub async fn run(&self, mode: Mode, sink: &mut dyn RecordSink) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        let mut stream = self.client.discover(self.config.target).await?;
        let workflows = self.cancel.child_token();
        let mut tasks = JoinSet::new();
        let mut seen: HashSet<DeviceId> = HashSet::new();

        info!(
            target = %self.config.target,
            mode = mode.name(),
            wait_ms = self.config.wait.as_millis() as u64,
            "Run started"
        );

        let deadline = tokio::time::sleep(self.config.wait);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = &mut deadline => {
                    info!("Deadline reached");
                    break;
                }
                () = self.cancel.cancelled() => {
                    info!("Run interrupted");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    collect(joined, sink, &mut summary)?;
                }
                reply = stream.next_reply() => {
                    let Some(inbound) = reply else {
                        warn!("Client closed during discovery");
                        break;
                    };
                    let device = match DiscoveredDevice::parse(&inbound) {
                        Ok(device) => device,
                        Err(e) => {
                            warn!(source = %inbound.source, error = %e, "Ignoring discovery reply");
                            continue;
                        }
                    };

                    summary.discovered += 1;
                    if self.config.duplicates == DuplicatePolicy::Ignore && !seen.insert(device.device_id) {
                        debug!(device = %device.device_id, source = %device.source, "Duplicate reply ignored");
                        summary.duplicates += 1;
                        continue;
                    }

                    info!(
                        device = %device.device_id,
                        address = %device.address,
                        source = %device.source,
                        "Device found"
                    );
                    tasks.spawn(workflow::run(self.client.clone(), device, mode.clone(), workflows.clone()));
                }
            }
        }

        drop(stream);
        workflows.cancel();
        while let Some(joined) = tasks.join_next().await {
            collect(joined, sink, &mut summary)?;
        }

        info!(
            discovered = summary.discovered,
            emitted = summary.emitted,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Run finished"
        );
        Ok(summary)
    }
}

fn collect(
    joined: Result<WorkflowOutcome, JoinError>,
    sink: &mut dyn RecordSink,
    summary: &mut RunSummary,
) -> io::Result<()> {
    match joined {
        Ok(WorkflowOutcome::Emitted(record)) => {
            sink.emit(&record)?;
            summary.emitted += 1;
        }
        Ok(WorkflowOutcome::Failed(_)) => summary.failed += 1,
        Ok(WorkflowOutcome::Cancelled) => summary.cancelled += 1,
        Err(e) => {
            warn!(error = %e, "Workflow task ended abnormally");
            summary.failed += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::correlator::Correlator;
    use crate::core::record::RecordDetails;
    use crate::core::simulator::{spawn_network, DeviceProfile, SimulatedDevice};
    use crate::core::transport::MemoryTransport;
    use std::sync::Arc;

    fn profile(last: u8) -> DeviceProfile {
        DeviceProfile {
            mac: crate::core::protocol::MacAddress([0x00, 0x90, 0xe8, 0x00, 0x00, last]),
            address: Ipv4Addr::new(10, 0, 0, last),
            ..DeviceProfile::default()
        }
    }

    fn config(duplicates: DuplicatePolicy) -> OrchestratorConfig {
        OrchestratorConfig {
            target: "10.0.0.255:4800".parse().unwrap(),
            wait: Duration::from_secs(1),
            duplicates,
        }
    }

    fn network(devices: Vec<(&str, SimulatedDevice)>) -> Client {
        let (transport, handle) = MemoryTransport::new("10.0.0.1:40000".parse().unwrap());
        let devices = devices
            .into_iter()
            .map(|(addr, device)| (addr.parse().unwrap(), device))
            .collect();
        spawn_network(handle, devices);
        Client::with_correlator(Arc::new(transport), Correlator::with_cursor(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_mode_emits_each_device() {
        let client = network(vec![
            ("10.0.0.7:4800", SimulatedDevice::new(profile(7))),
            ("10.0.0.8:4800", SimulatedDevice::new(profile(8))),
        ]);
        let orchestrator = Orchestrator::new(client.clone(), config(DuplicatePolicy::Spawn));

        let mut records = Vec::new();
        let summary = orchestrator.run(Mode::Discover, &mut records).await.unwrap();

        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.emitted, 2);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.details == RecordDetails::Discover));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_policy() {
        let same = || SimulatedDevice::new(profile(7));
        let devices = || vec![("10.0.0.7:4800", same()), ("10.0.0.9:4800", same())];

        let mut records = Vec::new();
        let summary = Orchestrator::new(network(devices()), config(DuplicatePolicy::Spawn))
            .run(Mode::Discover, &mut records)
            .await
            .unwrap();
        assert_eq!(summary.emitted, 2);

        let mut records = Vec::new();
        let summary = Orchestrator::new(network(devices()), config(DuplicatePolicy::Ignore))
            .run(Mode::Discover, &mut records)
            .await
            .unwrap();
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.emitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_stops_run() {
        let client = network(vec![("10.0.0.7:4800", SimulatedDevice::new(profile(7)).silence(0x10))]);
        let mut config = config(DuplicatePolicy::Spawn);
        config.wait = Duration::from_secs(3600);
        let orchestrator = Orchestrator::new(client.clone(), config);

        let cancel = orchestrator.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            cancel.cancel();
        });

        let start = tokio::time::Instant::now();
        let mut records = Vec::new();
        let summary = orchestrator.run(Mode::Query, &mut records).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.cancelled, 1);
        assert!(records.is_empty());
        assert_eq!(client.pending(), 0);
    }

    #[test]
    fn test_duplicate_policy_serde() {
        let policy: DuplicatePolicy = serde_json::from_str("\"ignore\"").unwrap();
        assert_eq!(policy, DuplicatePolicy::Ignore);
        assert_eq!(serde_json::to_string(&DuplicatePolicy::Spawn).unwrap(), "\"spawn\"");
    }
}
