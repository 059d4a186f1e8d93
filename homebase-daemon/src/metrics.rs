// HomeBase Daemon - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the base station.
//!
//! The receive loop keeps plain counters in [`ReceiverMetrics`]; after each
//! cycle the daemon pushes the difference since the previous cycle here.

use homebase::{ChannelState, ReceiverMetrics};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter_vec, register_int_gauge, Encoder, Gauge, IntCounterVec,
    IntGauge, TextEncoder,
};

lazy_static! {
    /// Receive loop events by kind.
    pub static ref EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "homebase_events_total",
        "Receive loop events by kind",
        &["event"]
    ).unwrap();

    /// Current channel owner (0 = open).
    pub static ref CHANNEL_OWNER: IntGauge = register_int_gauge!(
        "homebase_channel_owner",
        "Device currently holding the channel (0 = open)"
    ).unwrap();

    /// Fraction of frames that failed to decode.
    pub static ref DECODE_ERROR_RATE: Gauge = register_gauge!(
        "homebase_decode_error_rate",
        "Fraction of received frames that failed to decode"
    ).unwrap();

    /// Replay position in frames.
    pub static ref REPLAY_POSITION: IntGauge = register_int_gauge!(
        "homebase_replay_position",
        "Frames consumed from the replay file"
    ).unwrap();
}

/// Push counter deltas and current state after a cycle.
pub fn update_from_receiver(
    previous: &ReceiverMetrics,
    current: &ReceiverMetrics,
    state: &ChannelState,
) {
    let deltas = [
        ("frame", current.frames, previous.frames),
        ("decode_error", current.decode_errors, previous.decode_errors),
        ("acquired", current.acquisitions, previous.acquisitions),
        ("data", current.data_packets, previous.data_packets),
        ("released", current.releases, previous.releases),
        ("timeout", current.timeouts, previous.timeouts),
        ("ignored", current.ignored, previous.ignored),
        ("refreshed", current.refreshed, previous.refreshed),
        ("forwarded", current.forwarded, previous.forwarded),
        ("fallback_write", current.fallback_writes, previous.fallback_writes),
        ("lost", current.lost, previous.lost),
    ];
    for (event, now, before) in deltas {
        let delta = now.saturating_sub(before);
        if delta > 0 {
            EVENTS_TOTAL.with_label_values(&[event]).inc_by(delta);
        }
    }

    CHANNEL_OWNER.set(i64::from(state.owner().unwrap_or(0)));
    DECODE_ERROR_RATE.set(current.decode_error_rate());
}

/// Update replay position.
pub fn update_replay_position(position: usize) {
    REPLAY_POSITION.set(position as i64);
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
