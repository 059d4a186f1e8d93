// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for HomeBase
//!
//! This module defines all error types used throughout the library.
//! Arbitration has no error type: ignoring a packet is a normal decision.

use thiserror::Error;

/// Result type alias for HomeBase operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for HomeBase operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Downstream sink error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Fallback store error
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Radio port error
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors while decoding a radio frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame shorter than the configured payload length
    #[error("Frame too short: need at least {needed} bytes, got {available}")]
    TooShort { needed: usize, available: usize },
}

/// Errors while encoding a packet into a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Body does not fit the frame
    #[error("Body too long: {size} bytes exceeds capacity {capacity}")]
    BodyTooLong { size: usize, capacity: usize },

    /// Body was not padded to the frame's body capacity
    #[error("Body length {size} does not match frame body of {capacity} bytes")]
    BodyNotPadded { size: usize, capacity: usize },
}

/// Errors reported by a message sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Delivery did not complete in time
    #[error("Sink timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Sink unreachable
    #[error("Sink disconnected: {reason}")]
    Disconnected { reason: String },

    /// Sink refused the record
    #[error("Record rejected: {0}")]
    Rejected(String),

    /// Record could not be serialized
    #[error("Serialization failed: {0}")]
    Serialize(String),
}

/// Errors writing or reading the fallback store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// I/O failure on the store file
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// Record could not be serialized
    #[error("Serialization failed: {0}")]
    Serialize(String),

    /// Stored line failed its checksum or could not be parsed
    #[error("Corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Errors from the radio port. These are fatal for the receive loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Transceiver no longer reachable
    #[error("Radio disconnected: {reason}")]
    Disconnected { reason: String },

    /// Transport failure talking to the transceiver
    #[error("Radio I/O error: {0}")]
    Io(String),

    /// A finite frame source ran out of frames
    #[error("Frame source exhausted")]
    Exhausted,
}

/// Errors loading or validating configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Cannot read {path}: {reason}")]
    Io { path: String, reason: String },

    /// Config file is not valid JSON for [`BridgeConfig`](crate::BridgeConfig)
    #[error("Parse error: {0}")]
    Parse(String),

    /// A field holds an unusable value
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
