// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Forwarding of accepted data packets
//!
//! One delivery attempt per record. A refused record goes to the
//! [`FallbackStore`] for offline replay; nothing here retries, and nothing
//! here can fail the arbitration step that triggered it.

use crate::error::{PersistenceError, SinkError};
use crate::fallback::FallbackStore;
use crate::protocol::Packet;
use crate::sink::{ForwardRecord, MessageSink};
use chrono::{DateTime, Utc};
use log::{error, info, warn};

/// What happened to one forwarded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Sink accepted the record
    Delivered,
    /// Sink refused it; the record is in the fallback store
    Persisted(SinkError),
    /// Sink refused it and the store could not be written
    Lost {
        /// Delivery failure
        sink: SinkError,
        /// Store failure
        persistence: PersistenceError,
    },
}

impl ForwardOutcome {
    /// Whether the record reached the sink
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Sends accepted packets downstream
#[derive(Debug)]
pub struct Forwarder<S> {
    sink: S,
    store: FallbackStore,
}

impl<S: MessageSink> Forwarder<S> {
    /// Create a forwarder over `sink` with `store` as dead-letter log
    pub fn new(sink: S, store: FallbackStore) -> Self {
        Self { sink, store }
    }

    /// Forward one packet received at `timestamp`
    pub fn forward(&mut self, packet: &Packet, timestamp: DateTime<Utc>) -> ForwardOutcome {
        info!("Forwarding packet from device {}", packet.device);
        let record = ForwardRecord::from_packet(packet, timestamp);

        let sink_err = match self.sink.send(&record) {
            Ok(()) => return ForwardOutcome::Delivered,
            Err(e) => e,
        };
        warn!(
            "Failed to send record from device {}: {}",
            record.device, sink_err
        );

        match self.store.append(&record) {
            Ok(()) => {
                info!(
                    "Record from device {} saved to {}",
                    record.device,
                    self.store.path().display()
                );
                ForwardOutcome::Persisted(sink_err)
            }
            Err(persistence) => {
                error!(
                    "DATA LOST: record from device {} could not be delivered ({}) nor saved ({})",
                    record.device, sink_err, persistence
                );
                ForwardOutcome::Lost {
                    sink: sink_err,
                    persistence,
                }
            }
        }
    }

    /// Underlying sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the sink
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Fallback store
    pub fn store(&self) -> &FallbackStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use tempfile::tempdir;

    #[test]
    fn test_delivered_leaves_store_empty() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::new(dir.path().join("failed.jsonl"));
        let mut forwarder = Forwarder::new(MemorySink::new(), store);

        let outcome = forwarder.forward(&Packet::data(5, 1, 2, 1, b"42C"), Utc::now());
        assert!(outcome.is_delivered());
        assert_eq!(forwarder.sink().delivered().len(), 1);
        assert!(forwarder.store().load().unwrap().records.is_empty());
    }

    #[test]
    fn test_failure_persists_once() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::new(dir.path().join("failed.jsonl"));
        let sink = MemorySink::failing(SinkError::Timeout { timeout_ms: 500 });
        let mut forwarder = Forwarder::new(sink, store);

        let ts = Utc::now();
        let outcome = forwarder.forward(&Packet::data(5, 1, 2, 1, b"42C"), ts);
        assert_eq!(
            outcome,
            ForwardOutcome::Persisted(SinkError::Timeout { timeout_ms: 500 })
        );
        assert_eq!(forwarder.sink().attempts(), 1);

        let log = forwarder.store().load().unwrap();
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.records[0].timestamp, ts);
    }

    #[test]
    fn test_unwritable_store_reports_loss() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for append
        let store = FallbackStore::new(dir.path());
        let sink = MemorySink::failing(SinkError::Rejected("down".to_string()));
        let mut forwarder = Forwarder::new(sink, store);

        let outcome = forwarder.forward(&Packet::data(5, 1, 2, 0, b"x"), Utc::now());
        assert!(matches!(outcome, ForwardOutcome::Lost { .. }));
    }
}
