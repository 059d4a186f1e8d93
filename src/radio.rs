// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Radio port abstraction
//!
//! The transceiver driver (pins, SPI, data rate, dynamic payloads) lives
//! outside this crate. The receive loop only needs to wait for a frame, read
//! it, and load the next ack payload.

use crate::ack::AckPayload;
use crate::error::RadioError;
use std::collections::VecDeque;
use std::time::Duration;

/// Trait for the transceiver seen by the receive loop
pub trait RadioPort {
    /// Wait up to `timeout` for a frame; `Ok(false)` if none arrived
    fn poll_available(&mut self, timeout: Duration) -> Result<bool, RadioError>;

    /// Read one complete frame
    fn read_frame(&mut self) -> Result<Vec<u8>, RadioError>;

    /// Load the ack payload returned with the next received frame on `pipe`
    fn write_ack(&mut self, pipe: u8, ack: &AckPayload) -> Result<(), RadioError>;
}

/// In-memory radio for tests and local simulation
#[derive(Debug, Default)]
pub struct MemoryRadio {
    /// Frames waiting to be read
    rx_buffer: VecDeque<Vec<u8>>,
    /// Every ack written, oldest first
    acks: Vec<(u8, AckPayload)>,
    /// Report exhaustion instead of an empty poll once drained
    finite: bool,
    is_open: bool,
}

impl MemoryRadio {
    /// Create an empty radio that polls empty forever
    pub fn new() -> Self {
        Self {
            is_open: true,
            ..Default::default()
        }
    }

    /// Create a radio preloaded with frames that reports
    /// [`RadioError::Exhausted`] once they are consumed
    pub fn with_frames<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            rx_buffer: frames.into_iter().collect(),
            finite: true,
            is_open: true,
            ..Default::default()
        }
    }

    /// Queue a frame (simulate reception)
    pub fn push_incoming(&mut self, frame: Vec<u8>) {
        self.rx_buffer.push_back(frame);
    }

    /// Number of frames not yet read
    pub fn pending_incoming(&self) -> usize {
        self.rx_buffer.len()
    }

    /// All acks written so far
    pub fn acks(&self) -> &[(u8, AckPayload)] {
        &self.acks
    }

    /// Most recently written ack
    pub fn last_ack(&self) -> Option<&AckPayload> {
        self.acks.last().map(|(_, ack)| ack)
    }

    /// Simulate the transceiver going away
    pub fn close(&mut self) {
        self.is_open = false;
    }

    fn ensure_open(&self) -> Result<(), RadioError> {
        if self.is_open {
            Ok(())
        } else {
            Err(RadioError::Disconnected {
                reason: "Radio is closed".to_string(),
            })
        }
    }
}

impl RadioPort for MemoryRadio {
    fn poll_available(&mut self, _timeout: Duration) -> Result<bool, RadioError> {
        self.ensure_open()?;
        if self.rx_buffer.is_empty() && self.finite {
            return Err(RadioError::Exhausted);
        }
        Ok(!self.rx_buffer.is_empty())
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, RadioError> {
        self.ensure_open()?;
        self.rx_buffer.pop_front().ok_or(RadioError::Exhausted)
    }

    fn write_ack(&mut self, pipe: u8, ack: &AckPayload) -> Result<(), RadioError> {
        self.ensure_open()?;
        self.acks.push((pipe, ack.clone()));
        Ok(())
    }
}
