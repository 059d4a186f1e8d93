// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for HomeBase

use crate::error::ConfigError;
use crate::protocol::{FrameLayout, DEFAULT_PAYLOAD_LEN, HEADER_LEN, MAX_PAYLOAD_LEN};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Highest nRF24 RF channel
pub const MAX_RF_CHANNEL: u8 = 125;

/// Bridge configuration, loaded from a JSON file.
///
/// Every field has a default; a file only needs the fields it changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// RF channel (0-125)
    pub channel: u8,
    /// `[open_address, device_address]`, 5 bytes each
    pub pipe_addresses: [[u8; 5]; 2],
    /// SPI chip select pin
    pub csn_pin: u8,
    /// Chip enable GPIO
    pub ce_pin: u8,
    /// Seconds of silence before a hold is dropped
    pub hold_timeout_secs: u64,
    /// Request and ack payload length in bytes
    pub payload_len: usize,
    /// Pipe the ack payload is loaded on
    pub ack_pipe: u8,
    /// Upper bound on one radio poll, in milliseconds
    pub poll_interval_ms: u64,
    /// Sink `host:port`
    pub sink_endpoint: String,
    /// Sink topic
    pub sink_topic: String,
    /// Bound on one sink delivery, in milliseconds
    pub sink_timeout_ms: u64,
    /// Dead-letter file for undeliverable records
    pub fallback_store_path: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: 0x76,
            pipe_addresses: [[0xe7; 5], [0xc2; 5]],
            csn_pin: 0,
            ce_pin: 22,
            hold_timeout_secs: 30,
            payload_len: DEFAULT_PAYLOAD_LEN,
            ack_pipe: 1,
            poll_interval_ms: 10,
            sink_endpoint: "127.0.0.1:9092".to_string(),
            sink_topic: "homebase-readings".to_string(),
            sink_timeout_ms: 500,
            fallback_store_path: PathBuf::from("errors/failed.jsonl"),
        }
    }
}

impl BridgeConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate JSON config text
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel > MAX_RF_CHANNEL {
            return Err(ConfigError::Invalid {
                field: "channel",
                reason: format!("{} exceeds {}", self.channel, MAX_RF_CHANNEL),
            });
        }
        if self.payload_len <= HEADER_LEN || self.payload_len > MAX_PAYLOAD_LEN {
            return Err(ConfigError::Invalid {
                field: "payload_len",
                reason: format!(
                    "{} outside {}..={}",
                    self.payload_len,
                    HEADER_LEN + 1,
                    MAX_PAYLOAD_LEN
                ),
            });
        }
        if self.hold_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "hold_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.sink_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sink_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.sink_topic.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "sink_topic",
                reason: "must not be empty".to_string(),
            });
        }
        if self.fallback_store_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "fallback_store_path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Frame geometry
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::new(self.payload_len)
    }

    /// Hold timeout as a duration
    pub fn hold_timeout(&self) -> Duration {
        Duration::from_secs(self.hold_timeout_secs)
    }

    /// Poll bound as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Sink bound as a duration
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    /// Resolve `sink_endpoint` to a socket address.
    ///
    /// Name lookup blocks, so this runs once at startup rather than per send.
    pub fn sink_addr(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            field: "sink_endpoint",
            reason,
        };
        self.sink_endpoint
            .to_socket_addrs()
            .map_err(|e| invalid(format!("cannot resolve {}: {}", self.sink_endpoint, e)))?
            .next()
            .ok_or_else(|| invalid(format!("no address for {}", self.sink_endpoint)))
    }
}

/// Render a pipe address as `0xe7e7e7e7e7`
pub fn format_address(address: &[u8; 5]) -> String {
    let hex: String = address.iter().map(|b| format!("{:02x}", b)).collect();
    format!("0x{}", hex)
}
