//! Core module containing the protocol engine
//!
//! This module provides:
//! - Datagram transports (UDP socket, in-memory for tests)
//! - Wire codec for the management protocol header
//! - Sequence-number correlation of replies to outstanding requests
//! - Request/reply client with timeout and status classification
//! - Broadcast discovery
//! - Per-device scan and query workflows
//! - Run orchestration under a governing deadline
//! - Simulated terminal servers

pub mod client;
pub mod correlator;
pub mod discovery;
pub mod orchestrator;
pub mod protocol;
pub mod record;
pub mod simulator;
pub mod transport;
pub mod workflow;
