// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Receive loop
//!
//! One cycle per frame: poll the radio, decode, arbitrate, forward accepted
//! data, load the resulting ack. Only radio faults end the loop; decode,
//! sink and store failures are logged and the ack is still written.
//!
//! # Example
//!
//! ```rust
//! use homebase::{BridgeConfig, MemoryRadio, MemorySink, Packet, Receiver};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = BridgeConfig {
//!     fallback_store_path: dir.path().join("failed.jsonl"),
//!     ..Default::default()
//! };
//! let layout = config.layout();
//!
//! let mut radio = MemoryRadio::new();
//! radio.push_incoming(layout.encode(&layout.pad(Packet::request(5, 1)).unwrap()).unwrap());
//!
//! let mut receiver = Receiver::new(&config, radio, MemorySink::new());
//! let outcome = receiver.run_once().unwrap().unwrap();
//! assert_eq!(outcome.ack.owner(), 5);
//! ```

use crate::ack::{AckBuilder, AckPayload};
use crate::arbiter::{Arbiter, ChannelState, Decision, IgnoreReason, Step};
use crate::config::BridgeConfig;
use crate::error::{DecodeError, RadioError};
use crate::fallback::FallbackStore;
use crate::forwarder::{ForwardOutcome, Forwarder};
use crate::metrics::ReceiverMetrics;
use crate::protocol::{FrameLayout, Packet};
use crate::radio::RadioPort;
use crate::sink::MessageSink;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::time::{Duration, Instant};

/// Result of processing one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Decoded packet, or why decoding failed
    pub packet: Result<Packet, DecodeError>,
    /// Arbitration step (absent when decoding failed)
    pub step: Option<Step>,
    /// Forwarding result (only for accepted data)
    pub forward: Option<ForwardOutcome>,
    /// Ack written back to the radio
    pub ack: AckPayload,
}

/// Drives radio, arbiter and forwarder
#[derive(Debug)]
pub struct Receiver<R, S> {
    radio: R,
    arbiter: Arbiter,
    forwarder: Forwarder<S>,
    layout: FrameLayout,
    acks: AckBuilder,
    /// Ack currently loaded in the radio
    ack: AckPayload,
    ack_pipe: u8,
    poll_interval: Duration,
    metrics: ReceiverMetrics,
    started: bool,
}

impl<R: RadioPort, S: MessageSink> Receiver<R, S> {
    /// Create a receiver from `config`, storing failed records at
    /// `config.fallback_store_path`
    pub fn new(config: &BridgeConfig, radio: R, sink: S) -> Self {
        let store = FallbackStore::new(config.fallback_store_path.clone());
        Self::with_forwarder(config, radio, Forwarder::new(sink, store))
    }

    /// Create a receiver around an existing forwarder
    pub fn with_forwarder(config: &BridgeConfig, radio: R, forwarder: Forwarder<S>) -> Self {
        let layout = config.layout();
        let acks = AckBuilder::new(layout);
        Self {
            radio,
            arbiter: Arbiter::new(config.hold_timeout()),
            forwarder,
            layout,
            acks,
            ack: acks.open(),
            ack_pipe: config.ack_pipe,
            poll_interval: config.poll_interval(),
            metrics: ReceiverMetrics::new(),
            started: false,
        }
    }

    /// Load the initial open ack. Called implicitly by [`run_once`](Self::run_once).
    pub fn start(&mut self) -> Result<(), RadioError> {
        if !self.started {
            info!("Starting receiver, channel open");
            self.radio.write_ack(self.ack_pipe, &self.ack)?;
            self.started = true;
        }
        Ok(())
    }

    /// Wait up to the poll interval for one frame and process it.
    ///
    /// Returns `Ok(None)` when no frame arrived.
    pub fn run_once(&mut self) -> Result<Option<CycleOutcome>, RadioError> {
        self.start()?;
        if !self.radio.poll_available(self.poll_interval)? {
            return Ok(None);
        }
        let raw = self.radio.read_frame()?;
        self.process_frame(&raw, Instant::now(), Utc::now()).map(Some)
    }

    /// Process frames until the radio fails
    pub fn run(&mut self) -> Result<(), RadioError> {
        loop {
            self.run_once()?;
        }
    }

    /// Process one raw frame received at `now` (`received_at` on the wall clock)
    pub fn process_frame(
        &mut self,
        raw: &[u8],
        now: Instant,
        received_at: DateTime<Utc>,
    ) -> Result<CycleOutcome, RadioError> {
        self.metrics.frames += 1;

        let outcome = match self.layout.decode(raw) {
            Ok(packet) => self.process_packet(packet, now, received_at),
            Err(err) => {
                warn!("Dropping frame: {}", err);
                self.metrics.decode_errors += 1;
                CycleOutcome {
                    packet: Err(err),
                    step: None,
                    forward: None,
                    ack: self.ack.clone(),
                }
            }
        };

        self.radio.write_ack(self.ack_pipe, &outcome.ack)?;
        info!("Loaded payload reply: {:?}", outcome.ack.as_bytes());
        Ok(outcome)
    }

    fn process_packet(
        &mut self,
        packet: Packet,
        now: Instant,
        received_at: DateTime<Utc>,
    ) -> CycleOutcome {
        info!("Received {}", packet);

        let step = self.arbiter.step(&packet, now);
        self.metrics.record_step(&step);

        let forward = if step.decision.forwards() {
            let outcome = self.forwarder.forward(&packet, received_at);
            self.metrics.record_forward(&outcome);
            Some(outcome)
        } else {
            None
        };

        self.ack = match step.decision {
            Decision::Refreshed => {
                info!(
                    "Device {} re-requested the channel it holds, ack reverts to open",
                    packet.device
                );
                self.acks.open()
            }
            Decision::Ignored(reason) if step.timed_out.is_none() => {
                log_ignored(&packet, reason);
                self.ack.clone()
            }
            Decision::Ignored(reason) => {
                log_ignored(&packet, reason);
                self.acks.build(self.arbiter.state())
            }
            Decision::Acquired | Decision::Data { .. } => self.acks.build(self.arbiter.state()),
        };

        CycleOutcome {
            packet: Ok(packet),
            step: Some(step),
            forward,
            ack: self.ack.clone(),
        }
    }

    /// Current channel state
    pub fn state(&self) -> &ChannelState {
        self.arbiter.state()
    }

    /// Ack currently loaded
    pub fn current_ack(&self) -> &AckPayload {
        &self.ack
    }

    /// Counters since startup
    pub fn metrics(&self) -> &ReceiverMetrics {
        &self.metrics
    }

    /// The radio port
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutable access to the radio port
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// The forwarder
    pub fn forwarder(&self) -> &Forwarder<S> {
        &self.forwarder
    }

    /// Mutable access to the forwarder
    pub fn forwarder_mut(&mut self) -> &mut Forwarder<S> {
        &mut self.forwarder
    }
}

fn log_ignored(packet: &Packet, reason: IgnoreReason) {
    match reason {
        IgnoreReason::ChannelOpen => info!(
            "Message from device {} ignored, channel is open... ack re-loaded",
            packet.device
        ),
        IgnoreReason::NotOwner { owner } => info!(
            "Message from device {} ignored, channel held by {}... ack re-loaded",
            packet.device, owner
        ),
        IgnoreReason::ReservedDevice => {
            warn!("Request carrying reserved device id 0 ignored")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::MemoryRadio;
    use crate::error::SinkError;
    use crate::sink::MemorySink;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, Receiver<MemoryRadio, MemorySink>) {
        let dir = tempdir().unwrap();
        let config = BridgeConfig {
            fallback_store_path: dir.path().join("failed.jsonl"),
            ..Default::default()
        };
        let receiver = Receiver::new(&config, MemoryRadio::new(), MemorySink::new());
        (dir, receiver)
    }

    fn frame(packet: Packet) -> Vec<u8> {
        let layout = FrameLayout::default();
        layout.encode(&layout.pad(packet).unwrap()).unwrap()
    }

    #[test]
    fn test_start_writes_open_ack_once() {
        let (_dir, mut receiver) = setup();
        receiver.start().unwrap();
        receiver.start().unwrap();

        let acks = receiver.radio().acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].0, 1);
        assert_eq!(acks[0].1.owner(), 0);
    }

    #[test]
    fn test_run_once_without_frame() {
        let (_dir, mut receiver) = setup();
        assert!(receiver.run_once().unwrap().is_none());
        assert_eq!(receiver.metrics().frames, 0);
    }

    #[test]
    fn test_decode_error_keeps_ack() {
        let (_dir, mut receiver) = setup();
        let now = Instant::now();
        receiver
            .process_frame(&frame(Packet::request(5, 1)), now, Utc::now())
            .unwrap();

        let outcome = receiver.process_frame(&[5, 1], now, Utc::now()).unwrap();
        assert!(outcome.packet.is_err());
        assert!(outcome.step.is_none());
        assert_eq!(outcome.ack.owner(), 5);
        assert_eq!(receiver.metrics().decode_errors, 1);
        assert_eq!(receiver.radio().last_ack().unwrap().owner(), 5);
    }

    #[test]
    fn test_refresh_reverts_ack_but_keeps_owner() {
        let (_dir, mut receiver) = setup();
        let request = frame(Packet::request(5, 1));
        let now = Instant::now();

        receiver.process_frame(&request, now, Utc::now()).unwrap();
        let outcome = receiver.process_frame(&request, now, Utc::now()).unwrap();

        assert_eq!(outcome.step.unwrap().decision, Decision::Refreshed);
        assert_eq!(outcome.ack.owner(), 0);
        assert_eq!(receiver.state().owner(), Some(5));

        // A following non-owner packet keeps the open-looking ack
        let other = frame(Packet::data(9, 1, 1, 0, b"x"));
        let outcome = receiver.process_frame(&other, now, Utc::now()).unwrap();
        assert_eq!(outcome.ack.owner(), 0);
        assert_eq!(receiver.state().owner(), Some(5));
    }

    #[test]
    fn test_run_once_consumes_pushed_frame() {
        let (_dir, mut receiver) = setup();
        receiver.radio_mut().push_incoming(frame(Packet::request(7, 1)));
        assert_eq!(receiver.radio().pending_incoming(), 1);

        let outcome = receiver.run_once().unwrap().unwrap();
        assert_eq!(receiver.radio().pending_incoming(), 0);
        assert_eq!(outcome.ack.owner(), 7);
        assert_eq!(receiver.current_ack(), &outcome.ack);
        assert_eq!(receiver.radio().last_ack(), Some(receiver.current_ack()));
    }

    #[test]
    fn test_sink_outage_mid_exchange() {
        let (_dir, mut receiver) = setup();
        let now = Instant::now();
        receiver
            .process_frame(&frame(Packet::request(5, 1)), now, Utc::now())
            .unwrap();

        receiver
            .forwarder_mut()
            .sink_mut()
            .set_failure(Some(SinkError::Timeout { timeout_ms: 500 }));
        let outcome = receiver
            .process_frame(&frame(Packet::data(5, 1, 2, 0, b"21C")), now, Utc::now())
            .unwrap();

        assert!(matches!(outcome.forward, Some(ForwardOutcome::Persisted(_))));
        assert_eq!(receiver.state().owner(), Some(5));
        assert_eq!(receiver.forwarder().store().load().unwrap().records.len(), 1);
    }
}
