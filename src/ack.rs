//! Acknowledgment payloads
//!
//! The ack rides on the link-layer acknowledgment of every received frame and
//! announces who currently owns the channel: byte 0 is the owner id
//! (0 = open), every other byte is zero.

use crate::arbiter::ChannelState;
use crate::protocol::{FrameLayout, OPEN_DEVICE};

/// Fixed-length acknowledgment payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPayload {
    bytes: Vec<u8>,
}

impl AckPayload {
    /// All-zero ack announcing an open channel
    pub fn open(layout: &FrameLayout) -> Self {
        Self {
            bytes: vec![0; layout.payload_len()],
        }
    }

    /// Ack announcing `owner`
    pub fn held_by(layout: &FrameLayout, owner: u8) -> Self {
        let mut ack = Self::open(layout);
        ack.bytes[0] = owner;
        ack
    }

    /// Owner announced by this ack (0 = open)
    pub fn owner(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(OPEN_DEVICE)
    }

    /// Raw bytes to load into the transceiver
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for a layout-built ack
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builds acks from arbiter state
#[derive(Debug, Clone, Copy)]
pub struct AckBuilder {
    layout: FrameLayout,
}

impl AckBuilder {
    /// Create a builder for the given layout
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout }
    }

    /// Render the ownership state into an ack
    pub fn build(&self, state: &ChannelState) -> AckPayload {
        match state {
            ChannelState::Open => AckPayload::open(&self.layout),
            ChannelState::Held { owner, .. } => AckPayload::held_by(&self.layout, *owner),
        }
    }

    /// Open ack for this layout
    pub fn open(&self) -> AckPayload {
        AckPayload::open(&self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_open_ack_is_zero() {
        let builder = AckBuilder::new(FrameLayout::default());
        let ack = builder.build(&ChannelState::Open);
        assert_eq!(ack.len(), FrameLayout::default().payload_len());
        assert!(ack.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(ack.owner(), 0);
    }

    #[test]
    fn test_held_ack_carries_owner() {
        let builder = AckBuilder::new(FrameLayout::new(8));
        let state = ChannelState::Held {
            owner: 5,
            last_activity: Instant::now(),
        };
        let ack = builder.build(&state);
        assert_eq!(ack.as_bytes(), &[5, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(ack.owner(), 5);
    }

    #[test]
    fn test_length_independent_of_state() {
        let builder = AckBuilder::new(FrameLayout::new(12));
        let held = ChannelState::Held {
            owner: 255,
            last_activity: Instant::now(),
        };
        assert_eq!(builder.build(&held).len(), 12);
        assert_eq!(builder.build(&ChannelState::Open).len(), 12);
    }
}
