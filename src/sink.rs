// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Downstream message sinks
//!
//! A [`MessageSink`] receives one [`ForwardRecord`] per accepted data packet.
//! Sends must be bounded in time: a slow sink may not stall the radio.

use crate::error::SinkError;
use crate::protocol::Packet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Default bound on one delivery attempt
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_millis(500);

/// Serialized unit sent downstream (or persisted on failure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    /// Source device
    pub device: u8,
    /// Transmitter class
    pub device_type: u8,
    /// Message type (never 0 for forwarded records)
    pub msg_type: u8,
    /// Final-fragment flag
    pub tail: u8,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// Reception time
    pub timestamp: DateTime<Utc>,
}

impl ForwardRecord {
    /// Build a record from an accepted packet
    pub fn from_packet(packet: &Packet, timestamp: DateTime<Utc>) -> Self {
        Self {
            device: packet.device,
            device_type: packet.device_type,
            msg_type: packet.msg_type,
            tail: packet.tail,
            body: packet.body.clone(),
            timestamp,
        }
    }
}

/// Trait for downstream event pipelines
pub trait MessageSink {
    /// Deliver one record
    fn send(&mut self, record: &ForwardRecord) -> Result<(), SinkError>;
}

impl<S: MessageSink + ?Sized> MessageSink for Box<S> {
    fn send(&mut self, record: &ForwardRecord) -> Result<(), SinkError> {
        (**self).send(record)
    }
}

/// In-memory sink for tests and dry runs
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Vec<ForwardRecord>,
    attempts: usize,
    failure: Option<SinkError>,
}

impl MemorySink {
    /// Create a sink that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that rejects every record with `error`
    pub fn failing(error: SinkError) -> Self {
        Self {
            failure: Some(error),
            ..Default::default()
        }
    }

    /// Switch failure mode on (`Some`) or off (`None`)
    pub fn set_failure(&mut self, failure: Option<SinkError>) {
        self.failure = failure;
    }

    /// Records accepted so far
    pub fn delivered(&self) -> &[ForwardRecord] {
        &self.delivered
    }

    /// Number of `send` calls, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl MessageSink for MemorySink {
    fn send(&mut self, record: &ForwardRecord) -> Result<(), SinkError> {
        self.attempts += 1;
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        self.delivered.push(record.clone());
        Ok(())
    }
}

/// Envelope written by [`TcpSink`]
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    record: &'a ForwardRecord,
}

/// Reply line confirming a record
const ACK_OK: &str = "ok";

/// Newline-delimited JSON over TCP with per-record confirmation.
///
/// # Wire Format
///
/// ```text
/// -> {"topic":"...","record":{...}}\n
/// <- ok\n            record accepted
/// <- <reason>\n      record refused
/// ```
///
/// A record counts as delivered only once its `ok` line is read back. No
/// reply within `timeout`, a closed connection or any other reply is a
/// failure. Connects lazily and reconnects on the next send after a failure.
#[derive(Debug)]
pub struct TcpSink {
    endpoint: SocketAddr,
    topic: String,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpSink {
    /// Create a sink for `endpoint` publishing under `topic`
    pub fn new(endpoint: SocketAddr, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint,
            topic: topic.into(),
            timeout,
            stream: None,
        }
    }

    /// Configured endpoint
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Whether a connection is currently open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self) -> Result<&mut BufReader<TcpStream>, SinkError> {
        if self.stream.is_none() {
            let stream = TcpStream::connect_timeout(&self.endpoint, self.timeout)
                .map_err(|e| self.io_error(e))?;
            stream
                .set_write_timeout(Some(self.timeout))
                .map_err(|e| self.io_error(e))?;
            stream
                .set_read_timeout(Some(self.timeout))
                .map_err(|e| self.io_error(e))?;
            stream.set_nodelay(true).map_err(|e| self.io_error(e))?;
            log::debug!("Connected to sink {}", self.endpoint);
            self.stream = Some(BufReader::new(stream));
        }
        self.stream.as_mut().ok_or_else(|| SinkError::Disconnected {
            reason: "connection lost".to_string(),
        })
    }

    /// Write one line and wait for its confirmation
    fn exchange(&mut self, line: &[u8]) -> Result<(), SinkError> {
        let stream = self.connect()?;
        let written = stream.get_mut().write_all(line);
        let mut reply = String::new();
        let read = written.and_then(|_| stream.read_line(&mut reply));

        match read {
            Ok(0) => Err(SinkError::Disconnected {
                reason: format!("{}: closed by peer", self.endpoint),
            }),
            Ok(_) if reply.trim_end() == ACK_OK => Ok(()),
            Ok(_) => Err(SinkError::Rejected(reply.trim_end().to_string())),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, err: std::io::Error) -> SinkError {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => SinkError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            },
            _ => SinkError::Disconnected {
                reason: format!("{}: {}", self.endpoint, err),
            },
        }
    }
}

impl MessageSink for TcpSink {
    fn send(&mut self, record: &ForwardRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&Envelope {
            topic: &self.topic,
            record,
        })
        .map_err(|e| SinkError::Serialize(e.to_string()))?;
        line.push(b'\n');

        let result = self.exchange(&line);
        if result.is_err() {
            // Unconfirmed replies may still arrive; never reuse the stream
            self.stream = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    fn record() -> ForwardRecord {
        ForwardRecord::from_packet(&Packet::data(5, 1, 2, 1, b"42C"), Utc::now())
    }

    #[test]
    fn test_record_from_packet() {
        let ts = Utc::now();
        let rec = ForwardRecord::from_packet(&Packet::data(5, 1, 2, 1, b"42C"), ts);
        assert_eq!(rec.device, 5);
        assert_eq!(rec.msg_type, 2);
        assert_eq!(rec.tail, 1);
        assert_eq!(rec.body, b"42C".to_vec());
        assert_eq!(rec.timestamp, ts);
    }

    #[test]
    fn test_memory_sink_records() {
        let mut sink = MemorySink::new();
        sink.send(&record()).unwrap();
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(sink.attempts(), 1);
    }

    #[test]
    fn test_memory_sink_failure_mode() {
        let mut sink = MemorySink::failing(SinkError::Rejected("down".to_string()));
        assert!(sink.send(&record()).is_err());
        assert_eq!(sink.attempts(), 1);
        assert!(sink.delivered().is_empty());

        sink.set_failure(None);
        sink.send(&record()).unwrap();
        assert_eq!(sink.delivered().len(), 1);
    }

    /// Accept one connection and answer each line with the next reply;
    /// `None` closes the connection instead. Returns the lines received.
    fn broker(listener: TcpListener, replies: Vec<Option<&'static str>>) -> JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let (conn, _) = listener.accept().unwrap();
            let mut writer = conn.try_clone().unwrap();
            let mut reader = BufReader::new(conn);
            let mut lines = Vec::new();
            for reply in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                lines.push(line);
                match reply {
                    Some(reply) => writeln!(writer, "{}", reply).unwrap(),
                    None => return lines,
                }
            }
            lines
        })
    }

    fn tcp_sink(listener: &TcpListener) -> TcpSink {
        TcpSink::new(
            listener.local_addr().unwrap(),
            "readings",
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_tcp_sink_writes_json_line() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut sink = tcp_sink(&listener);
        assert_eq!(sink.endpoint(), listener.local_addr().unwrap());
        let peer = broker(listener, vec![Some("ok")]);

        sink.send(&record()).unwrap();
        assert!(sink.is_connected());

        let lines = peer.join().unwrap();
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["topic"], "readings");
        assert_eq!(value["record"]["device"], 5);
        assert_eq!(value["record"]["body"], serde_json::json!([52, 50, 67]));
    }

    #[test]
    fn test_tcp_sink_peer_closed_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut sink = tcp_sink(&listener);
        // Confirm the first record, then hang up without answering the second
        let peer = broker(listener, vec![Some("ok"), None]);

        sink.send(&record()).unwrap();
        let second = sink.send(&record());
        peer.join().unwrap();

        assert!(matches!(second, Err(SinkError::Disconnected { .. })));
        assert!(!sink.is_connected());
        // Listener is gone, so the reconnect fails too
        assert!(sink.send(&record()).is_err());
    }

    #[test]
    fn test_tcp_sink_rejected_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut sink = tcp_sink(&listener);
        let peer = broker(listener, vec![Some("unknown topic")]);

        let result = sink.send(&record());
        peer.join().unwrap();
        assert_eq!(result, Err(SinkError::Rejected("unknown topic".to_string())));
    }

    #[test]
    fn test_tcp_sink_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut sink = TcpSink::new(
            listener.local_addr().unwrap(),
            "readings",
            Duration::from_millis(100),
        );

        // Accepted by the kernel backlog, never answered
        let result = sink.send(&record());
        assert!(matches!(result, Err(SinkError::Timeout { timeout_ms: 100 })));
        assert!(!sink.is_connected());
        drop(listener);
    }

    #[test]
    fn test_tcp_sink_unreachable() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut sink = TcpSink::new(addr, "readings", Duration::from_millis(200));
        assert!(sink.send(&record()).is_err());
        assert!(!sink.is_connected());
    }
}
