//! # HomeBase - nRF24 base-station bridge
//!
//! One receiver, many low-power transmitters that cannot coordinate. HomeBase
//! shares the half-duplex radio channel between them, decodes telemetry from
//! whichever device owns the channel and forwards it downstream.
//!
//! ## Key Features
//!
//! - **Single-owner arbitration**: a request acquires the open channel, the
//!   owner's final fragment or a hold timeout releases it
//! - **Ownership in the ack**: every link-layer ack carries the current owner
//! - **Sink-independent liveness**: forwarding failures never stall the radio
//! - **Dead-letter store**: refused records are appended for offline replay
//!
//! ## Quick Start
//!
//! ```rust
//! use homebase::{Arbiter, AckBuilder, Decision, FrameLayout, Packet};
//! use std::time::{Duration, Instant};
//!
//! let layout = FrameLayout::default();
//! let acks = AckBuilder::new(layout);
//! let mut arbiter = Arbiter::new(Duration::from_secs(30));
//!
//! // Device 5 asks for the channel
//! let frame = layout.encode(&layout.pad(Packet::request(5, 1)).unwrap()).unwrap();
//! let packet = layout.decode(&frame).unwrap();
//! let step = arbiter.step(&packet, Instant::now());
//!
//! assert_eq!(step.decision, Decision::Acquired);
//! assert_eq!(acks.build(arbiter.state()).as_bytes()[0], 5);
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Packet type and frame codec
//! - [`ack`]: Acknowledgment payloads
//! - [`arbiter`]: Channel ownership state machine
//! - [`radio`]: Radio port abstraction
//! - [`sink`]: Downstream sinks and forwarded records
//! - [`fallback`]: Dead-letter store
//! - [`forwarder`]: One-shot forwarding with fallback
//! - [`receiver`]: Receive loop
//! - [`config`]: Bridge configuration
//! - [`metrics`]: Receive loop counters

// Modules
pub mod ack;
pub mod arbiter;
pub mod config;
pub mod error;
pub mod fallback;
pub mod forwarder;
pub mod metrics;
pub mod protocol;
pub mod radio;
pub mod receiver;
pub mod sink;

// Re-exports for convenient access
pub use ack::{AckBuilder, AckPayload};
pub use arbiter::{Arbiter, ChannelState, Decision, IgnoreReason, Step};
pub use config::BridgeConfig;
pub use error::{
    BridgeError, ConfigError, DecodeError, EncodeError, PersistenceError, RadioError, Result,
    SinkError,
};
pub use fallback::{FallbackLog, FallbackStore};
pub use forwarder::{ForwardOutcome, Forwarder};
pub use metrics::ReceiverMetrics;
pub use protocol::{FrameLayout, Packet, DEFAULT_PAYLOAD_LEN, HEADER_LEN};
pub use radio::{MemoryRadio, RadioPort};
pub use receiver::{CycleOutcome, Receiver};
pub use sink::{ForwardRecord, MemorySink, MessageSink, TcpSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_basic_exchange() {
        let layout = FrameLayout::default();
        let acks = AckBuilder::new(layout);
        let mut arbiter = Arbiter::new(Duration::from_secs(30));
        let now = Instant::now();

        let frame = layout.encode(&layout.pad(Packet::request(5, 1)).unwrap()).unwrap();
        let request = layout.decode(&frame).unwrap();
        arbiter.step(&request, now);
        assert_eq!(acks.build(arbiter.state()).owner(), 5);

        let data = Packet::data(5, 1, 2, 1, b"42C");
        let step = arbiter.step(&data, now);
        assert_eq!(step.decision, Decision::Data { release: true });
        assert_eq!(acks.build(arbiter.state()).owner(), 0);
    }
}
