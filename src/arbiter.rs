// HomeBase - nRF24 base-station bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Channel arbitration
//!
//! One transceiver, many transmitters that cannot hear each other. The
//! [`Arbiter`] hands the channel to the first device that requests it and
//! ignores everybody else until the owner sends its final fragment or goes
//! silent for longer than the hold timeout.
//!
//! Each [`Arbiter::step`] evaluates, in order:
//!
//! 1. hold timeout (a stale hold is dropped before the packet is looked at)
//! 2. open channel: a request acquires it, data is ignored
//! 3. held channel: only the owner's data is accepted, its final fragment
//!    releases the hold

use crate::protocol::{Packet, OPEN_DEVICE};
use log::info;
use std::fmt;
use std::time::{Duration, Instant};

/// Default idle time before a hold is dropped
pub const DEFAULT_HOLD_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No device owns the channel
    #[default]
    Open,
    /// `owner` (never 0) has exclusive access
    Held {
        /// Owning device id
        owner: u8,
        /// Time of the last accepted packet from `owner`
        last_activity: Instant,
    },
}

impl ChannelState {
    /// Current owner, if any
    pub fn owner(&self) -> Option<u8> {
        match self {
            Self::Open => None,
            Self::Held { owner, .. } => Some(*owner),
        }
    }

    /// Whether nobody holds the channel
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Held { owner, .. } => write!(f, "HELD({})", owner),
        }
    }
}

/// Why a packet was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Data arrived while nobody holds the channel
    ChannelOpen,
    /// Packet from a device other than the owner
    NotOwner {
        /// Device holding the channel
        owner: u8,
    },
    /// Request carrying the reserved device id 0
    ReservedDevice,
}

/// Outcome of one arbitration step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request accepted, sender now owns the channel
    Acquired,
    /// Data from the owner, to be forwarded
    Data {
        /// Final fragment: the hold was released
        release: bool,
    },
    /// Owner repeated its request while holding the channel.
    ///
    /// Ownership and activity time are left untouched but the ack reverts to
    /// open. This mirrors deployed transmitters and is a known inconsistency.
    Refreshed,
    /// Packet dropped
    Ignored(IgnoreReason),
}

impl Decision {
    /// Whether the packet's payload must be forwarded
    pub fn forwards(&self) -> bool {
        matches!(self, Self::Data { .. })
    }
}

/// Result of [`Arbiter::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Decision for the packet
    pub decision: Decision,
    /// Owner whose hold expired before the packet was evaluated
    pub timed_out: Option<u8>,
}

/// Single-owner channel state machine
#[derive(Debug)]
pub struct Arbiter {
    state: ChannelState,
    hold_timeout: Duration,
}

impl Arbiter {
    /// Create an arbiter with an open channel
    pub fn new(hold_timeout: Duration) -> Self {
        Self {
            state: ChannelState::Open,
            hold_timeout,
        }
    }

    /// Current state
    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Current owner, if any
    pub fn owner(&self) -> Option<u8> {
        self.state.owner()
    }

    /// Whether the channel is open
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Configured hold timeout
    pub fn hold_timeout(&self) -> Duration {
        self.hold_timeout
    }

    /// Evaluate one packet received at `now`
    pub fn step(&mut self, packet: &Packet, now: Instant) -> Step {
        let timed_out = self.expire(now);
        let decision = self.decide(packet, now);
        Step {
            decision,
            timed_out,
        }
    }

    /// Drop a hold idle for at least `hold_timeout`, returning its owner
    fn expire(&mut self, now: Instant) -> Option<u8> {
        if let ChannelState::Held {
            owner,
            last_activity,
        } = self.state
        {
            if now.saturating_duration_since(last_activity) >= self.hold_timeout {
                info!(
                    "Releasing channel: device {} idle for more than {}s",
                    owner,
                    self.hold_timeout.as_secs()
                );
                self.state = ChannelState::Open;
                return Some(owner);
            }
        }
        None
    }

    fn decide(&mut self, packet: &Packet, now: Instant) -> Decision {
        match self.state {
            ChannelState::Open => {
                if !packet.is_request() {
                    return Decision::Ignored(IgnoreReason::ChannelOpen);
                }
                if packet.device == OPEN_DEVICE {
                    return Decision::Ignored(IgnoreReason::ReservedDevice);
                }
                info!("Channel acquired by device {}", packet.device);
                self.state = ChannelState::Held {
                    owner: packet.device,
                    last_activity: now,
                };
                Decision::Acquired
            }
            ChannelState::Held { owner, .. } if packet.device != owner => {
                Decision::Ignored(IgnoreReason::NotOwner { owner })
            }
            ChannelState::Held { owner, .. } => {
                if packet.is_request() {
                    return Decision::Refreshed;
                }
                let release = packet.is_final();
                if release {
                    info!("Final fragment from device {}, channel released", owner);
                    self.state = ChannelState::Open;
                } else {
                    self.state = ChannelState::Held {
                        owner,
                        last_activity: now,
                    };
                }
                Decision::Data { release }
            }
        }
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_TIMEOUT)
    }
}
