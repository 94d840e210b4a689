//! Per-socket backpressure policy
//!
//! Telemetry and binary frames are only queued for a peer while its backlog
//! of unsent bytes stays under the threshold. Slow consumers lose data; the
//! fan-out to everyone else never waits on them.

use crate::constants::DEFAULT_BACKPRESSURE_BYTES;

/// How a message is treated by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Droppable: telemetry, visualization payloads, binary frames
    Data,
    /// Never dropped for backlog: signaling, commands, state pushes
    Control,
}

/// Outcome of offering a message to a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Backlog above threshold; this message was discarded for this peer only
    Dropped,
}

/// Queued-bytes threshold check
#[derive(Debug, Clone, Copy)]
pub struct BackpressureGate {
    threshold: usize,
}

impl BackpressureGate {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether a message may be queued given the peer's current backlog
    pub fn admit(&self, queued_bytes: usize, priority: Priority) -> bool {
        match priority {
            Priority::Control => true,
            Priority::Data => queued_bytes <= self.threshold,
        }
    }
}

impl Default for BackpressureGate {
    fn default() -> Self {
        Self::new(DEFAULT_BACKPRESSURE_BYTES)
    }
}
