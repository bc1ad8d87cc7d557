//! Supervisor events
//!
//! Everything a supervisor tells its owner arrives as one of these values
//! on the event channel returned at spawn time. The supervisor never drops
//! or filters captured traffic; address filtering is opt-in through the
//! predicate on [`CapturedFrame`].

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::frame::{CapturedFrame, MacAddress};
use crate::worker::ErrorEnvelope;

/// Why a supervisor is recreating its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartReason {
    /// Error-class fault: worker fault or abnormal exit. Restart happens
    /// after the configured error backoff.
    Error,
    /// Watchdog expiry. Restart happens immediately.
    Timeout,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Coarse supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    /// No worker is running and none is pending.
    Stopped,
    /// A worker is live (or starting up).
    Running,
    /// The worker was torn down after an error; a restart is pending the
    /// error backoff.
    BackingOff,
}

/// Events emitted by a capture supervisor.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// The capture worker came online.
    Started,
    /// The worker was torn down.
    Stopped,
    /// The worker is being recreated.
    Restarting(RestartReason),
    /// The watchdog expired with no worker message.
    Timeout,
    /// One captured frame, raw and with the address prefix stripped.
    Data(CapturedFrame),
    /// A fault reported by the worker or found while handling its output.
    Error(ErrorEnvelope),
    /// The worker terminated unexpectedly with the given exit code.
    Exit(i32),
}

/// Events emitted by a transmit supervisor.
#[derive(Debug, Clone)]
pub enum TransmitEvent {
    /// The transmit worker came online; `has_packet` tells whether a stored
    /// packet was pushed to it.
    Started {
        has_packet: bool,
    },
    /// The worker was torn down.
    Stopped,
    /// The worker is being recreated.
    Restarting(RestartReason),
    /// The watchdog expired with no worker message.
    Timeout,
    /// The current packet went out in full.
    Data {
        packet: Bytes,
        address: MacAddress,
    },
    /// The stored outbound packet was replaced.
    Updated(Bytes),
    /// The stored destination address was replaced.
    AddressUpdated(MacAddress),
    /// A fault reported by the worker or a rejected update.
    Error(ErrorEnvelope),
    /// The worker terminated unexpectedly with the given exit code.
    Exit(i32),
}
