// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Dead-letter store for records the sink refused
//!
//! # File Format
//!
//! ```text
//! <crc32: 8 hex digits> <record as JSON>\n
//! ```
//!
//! One line per failed record, appended with a single write and synced. A
//! line cut short by a crash has no newline or a bad checksum and is skipped
//! on load, so earlier records stay readable.

use crate::error::PersistenceError;
use crate::sink::ForwardRecord;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Append-only store of failed [`ForwardRecord`]s
#[derive(Debug, Clone)]
pub struct FallbackStore {
    path: PathBuf,
}

/// Contents of a store file
#[derive(Debug, Default)]
pub struct FallbackLog {
    /// Records that passed their checksum
    pub records: Vec<ForwardRecord>,
    /// Lines skipped as torn or corrupt
    pub corrupt: Vec<PersistenceError>,
}

impl FallbackStore {
    /// Store backed by `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    ///
    /// A torn last line left by a crash is terminated first so it cannot
    /// swallow the new record.
    pub fn append(&self, record: &ForwardRecord) -> Result<(), PersistenceError> {
        let mut line = encode_line(record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        if ends_torn(&mut file).map_err(|e| self.io_error(e))? {
            line.insert(0, b'\n');
        }
        file.write_all(&line).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Read every intact record. A missing file is an empty store.
    pub fn load(&self) -> Result<FallbackLog, PersistenceError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FallbackLog::default())
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let mut log = FallbackLog::default();
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut line_no = 0;

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| self.io_error(e))?;
            if n == 0 {
                break;
            }
            line_no += 1;

            match decode_line(&buf, line_no) {
                Ok(record) => log.records.push(record),
                Err(err) => {
                    log::warn!("Skipping fallback record: {}", err);
                    log.corrupt.push(err);
                }
            }
        }

        Ok(log)
    }

    fn io_error(&self, err: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Whether a non-empty file lacks its final newline
fn ends_torn(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn encode_line(record: &ForwardRecord) -> Result<Vec<u8>, PersistenceError> {
    let json =
        serde_json::to_vec(record).map_err(|e| PersistenceError::Serialize(e.to_string()))?;
    let checksum = crc32fast::hash(&json);

    let mut line = Vec::with_capacity(json.len() + 10);
    line.extend_from_slice(format!("{:08x} ", checksum).as_bytes());
    line.extend_from_slice(&json);
    line.push(b'\n');
    Ok(line)
}

fn decode_line(raw: &[u8], line: usize) -> Result<ForwardRecord, PersistenceError> {
    let corrupt = |reason: &str| PersistenceError::Corrupt {
        line,
        reason: reason.to_string(),
    };

    let raw = raw.strip_suffix(b"\n").ok_or_else(|| corrupt("truncated"))?;
    if raw.len() < 10 || raw[8] != b' ' {
        return Err(corrupt("missing checksum"));
    }

    let stored = std::str::from_utf8(&raw[..8])
        .ok()
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
        .ok_or_else(|| corrupt("bad checksum field"))?;
    let json = &raw[9..];
    let actual = crc32fast::hash(json);
    if stored != actual {
        return Err(PersistenceError::Corrupt {
            line,
            reason: format!("checksum mismatch: stored {:08x}, computed {:08x}", stored, actual),
        });
    }

    serde_json::from_slice(json).map_err(|e| corrupt(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Packet;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(device: u8, body: &[u8]) -> ForwardRecord {
        ForwardRecord::from_packet(&Packet::data(device, 1, 2, 1, body), Utc::now())
    }

    #[test]
    fn test_append_and_load() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::new(dir.path().join("nested/failed.jsonl"));

        store.append(&record(5, b"42C")).unwrap();
        store.append(&record(6, b"17C")).unwrap();

        let log = store.load().unwrap();
        assert_eq!(log.records.len(), 2);
        assert_eq!(log.records[0].device, 5);
        assert_eq!(log.records[1].body, b"17C".to_vec());
        assert!(log.corrupt.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::new(dir.path().join("absent.jsonl"));
        let log = store.load().unwrap();
        assert!(log.records.is_empty());
    }

    #[test]
    fn test_decode_line_rejects_tampering() {
        let rec = record(5, b"42C");
        let mut line = encode_line(&rec).unwrap();
        assert_eq!(decode_line(&line, 1).unwrap(), rec);

        let last = line.len() - 3;
        line[last] ^= 0x01;
        assert!(matches!(
            decode_line(&line, 1),
            Err(PersistenceError::Corrupt { line: 1, .. })
        ));
    }
}
