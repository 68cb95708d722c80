//! Sequence-number correlation of replies to outstanding requests
//!
//! Each live sequence number maps to exactly one [`Pending`] entry:
//! - a one-shot slot for request/reply exchanges
//! - an unbounded stream for broadcasts answered by any number of devices
//!
//! The table sits behind one mutex; allocation, registration, dispatch and
//! removal are each a single critical section. Replies are delivered in the
//! order [`Correlator::dispatch`] is called.

use crate::core::protocol::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A decoded reply and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Decoded message
    pub message: Message,
    /// Sender address
    pub source: SocketAddr,
}

/// Owner waiting on a sequence number
#[derive(Debug)]
pub enum Pending {
    /// Resolved by the first reply, then removed
    Slot(oneshot::Sender<Inbound>),
    /// Receives every reply until its owner goes away
    Stream(mpsc::UnboundedSender<Inbound>),
}

/// Outcome of routing one reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A slot was resolved and removed
    Resolved,
    /// Appended to a stream
    Streamed,
    /// No entry for the sequence number
    Unsolicited,
    /// The entry's owner was already gone; entry removed
    Abandoned,
}

/// Correlator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelatorError {
    /// Every 32-bit sequence number is live
    #[error("All sequence numbers are in use")]
    Exhausted,

    /// Sequence number already has an owner
    #[error("Sequence 0x{0:08x} is already registered")]
    AlreadyRegistered(u32),
}

struct Entry {
    generation: u64,
    pending: Pending,
}

struct Table {
    cursor: u32,
    next_generation: u64,
    entries: HashMap<u32, Entry>,
}

impl Table {
    fn allocate(&mut self) -> Result<u32, CorrelatorError> {
        if self.entries.len() as u64 > u64::from(u32::MAX) {
            return Err(CorrelatorError::Exhausted);
        }

        let start = self.cursor;
        let mut candidate = start;
        while self.entries.contains_key(&candidate) {
            candidate = candidate.wrapping_add(1);
            if candidate == start {
                return Err(CorrelatorError::Exhausted);
            }
        }
        self.cursor = candidate.wrapping_add(1);
        Ok(candidate)
    }

    fn insert(&mut self, sequence: u32, pending: Pending) -> Result<u64, CorrelatorError> {
        if self.entries.contains_key(&sequence) {
            return Err(CorrelatorError::AlreadyRegistered(sequence));
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries.insert(sequence, Entry { generation, pending });
        Ok(generation)
    }
}

/// Sequence-number table shared by every request on one transport
pub struct Correlator {
    table: Mutex<Table>,
}

impl Correlator {
    /// Create a correlator with a random starting cursor
    pub fn new() -> Self {
        Self::with_cursor(rand::random())
    }

    /// Create a correlator whose first allocation tries `cursor`
    pub fn with_cursor(cursor: u32) -> Self {
        Self {
            table: Mutex::new(Table {
                cursor,
                next_generation: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// Next sequence number not currently registered
    ///
    /// Scans forward from the cursor with wraparound. The number is not
    /// reserved; use [`Correlator::register_next`] to allocate and register
    /// atomically.
    pub fn allocate(&self) -> Result<u32, CorrelatorError> {
        self.table.lock().allocate()
    }

    /// Associate `sequence` with `pending`
    pub fn register(&self, sequence: u32, pending: Pending) -> Result<(), CorrelatorError> {
        self.table.lock().insert(sequence, pending).map(|_| ())
    }

    /// Allocate a sequence number and register `pending` under it
    ///
    /// The entry lives until it is resolved or the returned guard drops,
    /// whichever comes first.
    pub fn register_next(self: &Arc<Self>, pending: Pending) -> Result<Registration, CorrelatorError> {
        let (sequence, generation) = {
            let mut table = self.table.lock();
            let sequence = table.allocate()?;
            let generation = table.insert(sequence, pending)?;
            (sequence, generation)
        };

        Ok(Registration {
            correlator: Arc::clone(self),
            sequence,
            generation,
        })
    }

    /// Remove the entry for `sequence`; returns whether one existed
    pub fn deregister(&self, sequence: u32) -> bool {
        self.table.lock().entries.remove(&sequence).is_some()
    }

    fn deregister_generation(&self, sequence: u32, generation: u64) {
        let mut table = self.table.lock();
        if table
            .entries
            .get(&sequence)
            .is_some_and(|entry| entry.generation == generation)
        {
            table.entries.remove(&sequence);
        }
    }

    /// Route a reply to the owner of its sequence number
    pub fn dispatch(&self, inbound: Inbound) -> Dispatch {
        let sequence = inbound.message.header.sequence;
        let source = inbound.source;

        let outcome = {
            let mut table = self.table.lock();
            match table.entries.remove(&sequence) {
                None => Dispatch::Unsolicited,
                Some(Entry {
                    pending: Pending::Slot(tx),
                    ..
                }) => match tx.send(inbound) {
                    Ok(()) => Dispatch::Resolved,
                    Err(_) => Dispatch::Abandoned,
                },
                Some(Entry {
                    generation,
                    pending: Pending::Stream(tx),
                }) => match tx.send(inbound) {
                    Ok(()) => {
                        table.entries.insert(
                            sequence,
                            Entry {
                                generation,
                                pending: Pending::Stream(tx),
                            },
                        );
                        Dispatch::Streamed
                    }
                    Err(_) => Dispatch::Abandoned,
                },
            }
        };

        match outcome {
            Dispatch::Unsolicited => {
                warn!(sequence, %source, "Dropping unsolicited reply");
            }
            Dispatch::Abandoned => {
                debug!(sequence, %source, "Reply arrived after its waiter left");
            }
            Dispatch::Resolved | Dispatch::Streamed => {
                debug!(sequence, %source, ?outcome, "Reply dispatched");
            }
        }
        outcome
    }

    /// Drop every entry; waiters observe their channel closing
    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }

    /// Whether `sequence` is live
    pub fn contains(&self, sequence: u32) -> bool {
        self.table.lock().entries.contains_key(&sequence)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether no entry is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a sequence number registered; deregisters on drop
///
/// Dropping the guard is how cancelled requests release their entry. If the
/// entry was already resolved, or the number has since been reused by a
/// newer registration, the drop leaves the table untouched.
#[derive(Debug)]
pub struct Registration {
    correlator: Arc<Correlator>,
    sequence: u32,
    generation: u64,
}

impl Registration {
    /// The registered sequence number
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.correlator
            .deregister_generation(self.sequence, self.generation);
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator").field("live", &self.len()).finish()
    }
}
