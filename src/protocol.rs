//! Frame codec for sensor radio frames
//!
//! This module defines the decoded [`Packet`] and the fixed [`FrameLayout`]
//! used to map raw radio payloads onto it.
//!
//! # Frame Format
//!
//! ```text
//! [device: 1] [device_type: 1] [msg_type: 1] [tail: 1] [body: payload_len - 4]
//! ```
//!
//! All fields are raw unsigned bytes. The same `payload_len` sizes the ack.

use crate::error::{DecodeError, EncodeError};
use std::fmt;

/// Bytes taken by `device`, `device_type`, `msg_type` and `tail`
pub const HEADER_LEN: usize = 4;

/// Default payload length: 4 header bytes plus a 20 byte body
pub const DEFAULT_PAYLOAD_LEN: usize = 24;

/// Largest payload the transceiver can carry
pub const MAX_PAYLOAD_LEN: usize = 32;

/// Reserved device id meaning "no device"
pub const OPEN_DEVICE: u8 = 0;

/// `msg_type` value of a channel request
pub const MSG_REQUEST: u8 = 0;

/// `tail` value marking the last fragment of an exchange
pub const TAIL_FINAL: u8 = 1;

/// One decoded radio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Source device (1..=255)
    pub device: u8,
    /// Transmitter class, opaque to the arbiter
    pub device_type: u8,
    /// 0 = channel request, anything else = data
    pub msg_type: u8,
    /// 0 = more fragments follow, 1 = final fragment
    pub tail: u8,
    /// Payload bytes
    pub body: Vec<u8>,
}

impl Packet {
    /// Build a channel request from `device`
    pub fn request(device: u8, device_type: u8) -> Self {
        Self {
            device,
            device_type,
            msg_type: MSG_REQUEST,
            tail: 0,
            body: Vec::new(),
        }
    }

    /// Build a data packet
    pub fn data(device: u8, device_type: u8, msg_type: u8, tail: u8, body: &[u8]) -> Self {
        Self {
            device,
            device_type,
            msg_type,
            tail,
            body: body.to_vec(),
        }
    }

    /// Whether this packet asks for the channel
    pub fn is_request(&self) -> bool {
        self.msg_type == MSG_REQUEST
    }

    /// Whether this is the final fragment of the exchange
    pub fn is_final(&self) -> bool {
        self.tail == TAIL_FINAL
    }

    /// Body rendered as text for log lines, zero padding trimmed
    pub fn body_text(&self) -> String {
        let end = self
            .body
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        String::from_utf8_lossy(&self.body[..end]).into_owned()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device={} device_type={} msg_type={} tail={} body={:?}",
            self.device,
            self.device_type,
            self.msg_type,
            self.tail,
            self.body_text()
        )
    }
}

/// Fixed payload geometry shared by request frames and acks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    payload_len: usize,
}

impl FrameLayout {
    /// Create a layout for `payload_len` byte payloads.
    ///
    /// Callers validate the length through [`BridgeConfig`](crate::BridgeConfig);
    /// values below `HEADER_LEN` are raised to it.
    pub fn new(payload_len: usize) -> Self {
        Self {
            payload_len: payload_len.max(HEADER_LEN),
        }
    }

    /// Total payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Body capacity in bytes
    pub fn body_capacity(&self) -> usize {
        self.payload_len - HEADER_LEN
    }

    /// Decode a raw frame.
    ///
    /// Bytes past `payload_len` are ignored.
    pub fn decode(&self, raw: &[u8]) -> Result<Packet, DecodeError> {
        if raw.len() < self.payload_len {
            return Err(DecodeError::TooShort {
                needed: self.payload_len,
                available: raw.len(),
            });
        }

        Ok(Packet {
            device: raw[0],
            device_type: raw[1],
            msg_type: raw[2],
            tail: raw[3],
            body: raw[HEADER_LEN..self.payload_len].to_vec(),
        })
    }

    /// Zero-pad the body of `packet` to the body capacity.
    ///
    /// A padded packet is what [`decode`](Self::decode) returns for the same
    /// frame, so it is the form [`encode`](Self::encode) accepts.
    pub fn pad(&self, mut packet: Packet) -> Result<Packet, EncodeError> {
        let capacity = self.body_capacity();
        if packet.body.len() > capacity {
            return Err(EncodeError::BodyTooLong {
                size: packet.body.len(),
                capacity,
            });
        }
        packet.body.resize(capacity, 0);
        Ok(packet)
    }

    /// Encode a packet whose body fills the body capacity exactly.
    ///
    /// Use [`pad`](Self::pad) first for shorter bodies.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, EncodeError> {
        let capacity = self.body_capacity();
        if packet.body.len() > capacity {
            return Err(EncodeError::BodyTooLong {
                size: packet.body.len(),
                capacity,
            });
        }
        if packet.body.len() != capacity {
            return Err(EncodeError::BodyNotPadded {
                size: packet.body.len(),
                capacity,
            });
        }

        let mut buf = Vec::with_capacity(self.payload_len);
        buf.push(packet.device);
        buf.push(packet.device_type);
        buf.push(packet.msg_type);
        buf.push(packet.tail);
        buf.extend_from_slice(&packet.body);
        Ok(buf)
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_LEN)
    }
}
