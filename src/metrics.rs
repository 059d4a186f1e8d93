//! Receive loop counters
//!
//! Plain counters updated by the [`Receiver`](crate::Receiver) on every
//! cycle. The daemon mirrors them into Prometheus.

use crate::arbiter::{Decision, Step};
use crate::forwarder::ForwardOutcome;

/// Counters for one receiver since startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverMetrics {
    /// Frames read from the radio
    pub frames: u64,
    /// Frames that failed to decode
    pub decode_errors: u64,
    /// Channel acquisitions
    pub acquisitions: u64,
    /// Data packets accepted from the owner
    pub data_packets: u64,
    /// Holds released by a final fragment
    pub releases: u64,
    /// Holds dropped by timeout
    pub timeouts: u64,
    /// Packets ignored
    pub ignored: u64,
    /// Owner re-requests while holding
    pub refreshed: u64,
    /// Records accepted by the sink
    pub forwarded: u64,
    /// Records written to the fallback store
    pub fallback_writes: u64,
    /// Records neither delivered nor stored
    pub lost: u64,
}

impl ReceiverMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an arbitration step
    pub fn record_step(&mut self, step: &Step) {
        if step.timed_out.is_some() {
            self.timeouts += 1;
        }
        match step.decision {
            Decision::Acquired => self.acquisitions += 1,
            Decision::Data { release } => {
                self.data_packets += 1;
                if release {
                    self.releases += 1;
                }
            }
            Decision::Refreshed => self.refreshed += 1,
            Decision::Ignored(_) => self.ignored += 1,
        }
    }

    /// Count a forwarding outcome
    pub fn record_forward(&mut self, outcome: &ForwardOutcome) {
        match outcome {
            ForwardOutcome::Delivered => self.forwarded += 1,
            ForwardOutcome::Persisted(_) => self.fallback_writes += 1,
            ForwardOutcome::Lost { .. } => self.lost += 1,
        }
    }

    /// Fraction of frames that failed to decode (0.0-1.0)
    pub fn decode_error_rate(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.decode_errors as f64 / self.frames as f64
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
