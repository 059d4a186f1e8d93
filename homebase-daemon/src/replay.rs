// HomeBase Daemon - Frame replay radio
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Replay radio fed from a CSV capture.
//!
//! Stands in for the transceiver driver on a bench: frames are delivered at
//! their recorded offsets (scaled by `speed`) and acks are logged instead of
//! being loaded into hardware.
//!
//! ```text
//! offset_ms,frame_hex
//! 0,050100000000000000000000000000000000000000000000
//! 1500,050102013432430000000000000000000000000000000000
//! ```

use homebase::{AckPayload, RadioError, RadioPort};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Slowest accepted replay speed.
pub const MIN_SPEED: f64 = 0.001;

/// Configuration for frame replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Replay speed multiplier (1.0 = real-time, 10.0 = 10x faster).
    pub speed: f64,
    /// Whether to start over after the last frame.
    pub loop_replay: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_replay: false,
        }
    }
}

/// Replay progress shared with the HTTP handlers.
#[derive(Debug, Default)]
pub struct ReplayState {
    /// Frames delivered in the current pass.
    pub position: AtomicUsize,
    /// Frames in the capture.
    pub total_frames: AtomicUsize,
    /// Acks written so far.
    pub acks_written: AtomicUsize,
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CapturedFrame {
    offset_ms: u64,
    bytes: Vec<u8>,
}

/// [`RadioPort`] replaying a CSV capture.
#[derive(Debug)]
pub struct ReplayRadio {
    config: ReplayConfig,
    state: Arc<ReplayState>,
    frames: Vec<CapturedFrame>,
    position: usize,
    pass_start: Option<Instant>,
}

impl ReplayRadio {
    /// Load a capture from a CSV file.
    pub fn from_csv(path: impl AsRef<Path>, config: ReplayConfig) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReplayError::FileNotFound(path.display().to_string()));
        }
        let reader = csv::Reader::from_path(path)?;
        Self::from_reader(reader, config)
    }

    /// Load a capture from any CSV reader.
    pub fn from_reader<R: std::io::Read>(
        mut reader: csv::Reader<R>,
        config: ReplayConfig,
    ) -> Result<Self, ReplayError> {
        if !config.speed.is_finite() || config.speed < MIN_SPEED {
            return Err(ReplayError::InvalidFormat(format!(
                "speed must be at least {}, got {}",
                MIN_SPEED, config.speed
            )));
        }

        let headers = reader.headers()?.clone();
        let header_strs: Vec<&str> = headers.iter().collect();
        if header_strs != ["offset_ms", "frame_hex"] {
            return Err(ReplayError::InvalidFormat(
                "Columns must be 'offset_ms,frame_hex'".to_string(),
            ));
        }

        let mut frames = Vec::new();
        for (row, result) in reader.records().enumerate() {
            let record = result?;
            let offset_ms = record
                .get(0)
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| ReplayError::InvalidFormat(format!("Invalid offset at row {}", row + 1)))?;
            let bytes = record
                .get(1)
                .and_then(|s| parse_hex(s.trim()))
                .ok_or_else(|| ReplayError::InvalidFormat(format!("Invalid frame at row {}", row + 1)))?;
            frames.push(CapturedFrame { offset_ms, bytes });
        }

        if frames.is_empty() {
            return Err(ReplayError::EmptyCapture);
        }
        if frames.windows(2).any(|w| w[1].offset_ms < w[0].offset_ms) {
            return Err(ReplayError::InvalidFormat(
                "offsets must not decrease".to_string(),
            ));
        }

        let state = Arc::new(ReplayState::default());
        state.total_frames.store(frames.len(), Ordering::SeqCst);
        info!("Loaded capture: {} frames", frames.len());

        Ok(Self {
            config,
            state,
            frames,
            position: 0,
            pass_start: None,
        })
    }

    /// Get the replay state.
    pub fn state(&self) -> Arc<ReplayState> {
        Arc::clone(&self.state)
    }

    /// When the current frame is due; `None` if that lies beyond `Instant`.
    fn due_at(&self, start: Instant) -> Option<Instant> {
        let offset_ms = self.frames[self.position].offset_ms as f64 / self.config.speed;
        start.checked_add(Duration::from_millis(offset_ms as u64))
    }
}

impl RadioPort for ReplayRadio {
    fn poll_available(&mut self, timeout: Duration) -> Result<bool, RadioError> {
        if self.position >= self.frames.len() {
            if !self.config.loop_replay {
                return Err(RadioError::Exhausted);
            }
            info!("Capture complete, looping...");
            self.position = 0;
            self.pass_start = None;
            self.state.position.store(0, Ordering::SeqCst);
        }

        let start = *self.pass_start.get_or_insert_with(Instant::now);
        let now = Instant::now();
        let Some(due) = self.due_at(start) else {
            std::thread::sleep(timeout);
            return Ok(false);
        };
        if now >= due {
            return Ok(true);
        }

        let wait = due - now;
        std::thread::sleep(wait.min(timeout));
        Ok(Instant::now() >= due)
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, RadioError> {
        let frame = self
            .frames
            .get(self.position)
            .ok_or(RadioError::Exhausted)?
            .bytes
            .clone();
        self.position += 1;
        self.state.position.store(self.position, Ordering::SeqCst);
        Ok(frame)
    }

    fn write_ack(&mut self, pipe: u8, ack: &AckPayload) -> Result<(), RadioError> {
        self.state.acks_written.fetch_add(1, Ordering::SeqCst);
        debug!("Ack on pipe {}: {:?}", pipe, ack.as_bytes());
        Ok(())
    }
}

/// Parse a hex string such as `0501ff`.
fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Errors that can occur loading a capture.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Empty capture")]
    EmptyCapture,
}
