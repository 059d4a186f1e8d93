// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Integration tests for the fallback store
//!
//! These tests check that the store survives an interrupted write and that
//! the forwarder only appends when the sink refuses a record.

use chrono::Utc;
use homebase::{
    FallbackStore, ForwardOutcome, ForwardRecord, Forwarder, MemorySink, Packet, SinkError,
    TcpSink,
};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn record(device: u8, body: &[u8]) -> ForwardRecord {
    ForwardRecord::from_packet(&Packet::data(device, 1, 2, 0, body), Utc::now())
}

#[test]
fn test_torn_tail_is_skipped_and_isolated() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("failed.jsonl");
    let store = FallbackStore::new(&path);

    store.append(&record(1, b"first")).unwrap();

    // Simulate a crash halfway through a write
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"1a2b3c4d {\"device\":2,\"devi").unwrap();
    }

    store.append(&record(3, b"third")).unwrap();

    let log = store.load().unwrap();
    let devices: Vec<u8> = log.records.iter().map(|r| r.device).collect();
    assert_eq!(devices, vec![1, 3]);
    assert_eq!(log.corrupt.len(), 1);
}

#[test]
fn test_garbage_lines_do_not_hide_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("failed.jsonl");
    let store = FallbackStore::new(&path);

    store.append(&record(1, b"a")).unwrap();
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not a record\n").unwrap();
    }
    store.append(&record(2, b"b")).unwrap();

    let log = store.load().unwrap();
    assert_eq!(log.records.len(), 2);
    assert_eq!(log.corrupt.len(), 1);
}

#[test]
fn test_one_entry_per_failed_forward() {
    let dir = tempdir().unwrap();
    let store = FallbackStore::new(dir.path().join("errors/failed.jsonl"));
    let mut forwarder = Forwarder::new(MemorySink::new(), store);

    forwarder.forward(&Packet::data(5, 1, 2, 0, b"ok"), Utc::now());

    forwarder
        .sink_mut()
        .set_failure(Some(SinkError::Timeout { timeout_ms: 500 }));
    forwarder.forward(&Packet::data(5, 1, 2, 0, b"lost1"), Utc::now());
    forwarder.forward(&Packet::data(5, 1, 2, 1, b"lost2"), Utc::now());

    forwarder.sink_mut().set_failure(None);
    forwarder.forward(&Packet::data(6, 1, 2, 1, b"ok"), Utc::now());

    let log = forwarder.store().load().unwrap();
    assert_eq!(log.records.len(), 2);
    assert_eq!(log.records[0].body, b"lost1".to_vec());
    assert_eq!(log.records[1].body, b"lost2".to_vec());
    assert_eq!(forwarder.sink().delivered().len(), 2);
    assert_eq!(forwarder.sink().attempts(), 4);
}

#[test]
fn test_record_after_broker_hangup_is_persisted() {
    let dir = tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let sink = TcpSink::new(
        listener.local_addr().unwrap(),
        "readings",
        Duration::from_secs(1),
    );

    // Confirm the first record, read the second and hang up without a reply
    let broker = thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        let mut writer = conn.try_clone().unwrap();
        let mut reader = BufReader::new(conn);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        writeln!(writer, "ok").unwrap();
        line.clear();
        reader.read_line(&mut line).unwrap();
    });

    let mut forwarder = Forwarder::new(sink, FallbackStore::new(dir.path().join("failed.jsonl")));
    let first = forwarder.forward(&Packet::data(5, 1, 2, 0, b"21C"), Utc::now());
    let second = forwarder.forward(&Packet::data(5, 1, 2, 1, b"22C"), Utc::now());
    broker.join().unwrap();

    assert!(first.is_delivered());
    assert!(matches!(second, ForwardOutcome::Persisted(_)));
    let log = forwarder.store().load().unwrap();
    assert_eq!(log.records.len(), 1);
    assert_eq!(log.records[0].body, b"22C".to_vec());
}
