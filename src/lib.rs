//! # rawlink
//!
//! Supervised raw link-layer I/O loops.
//!
//! This crate keeps two kinds of long-running loops alive indefinitely: a
//! capture loop that continuously reads frames from a network interface and
//! a transmit loop that continuously sends a (mutable) frame to a
//! destination address. Workers run as isolated tasks; a supervisor per
//! worker owns its lifecycle, restarts it on faults, crashes and silence,
//! and validates everything crossing the wire-format boundary.
//!
//! ## Architecture
//!
//! The implementation is organized into several modules:
//! - `frame`: addresses, frame validation and captured-frame views
//! - `delay`: the interruptible pacing delay used by worker loops
//! - `io`: boundary traits over the privileged capture/transmit primitives
//! - `worker`: worker loop bodies, message protocol and fault envelopes
//! - `config`: per-supervisor configuration with documented defaults
//! - `event`: owner-facing supervisor events
//! - `capture`: the capture supervisor
//! - `transmit`: the transmit supervisor

pub mod capture;
pub mod config;
pub mod delay;
pub mod event;
pub mod frame;
pub mod io;
pub mod transmit;
pub mod worker;

// Re-export commonly used types
pub use crate::capture::CaptureSupervisor;
pub use crate::config::SupervisorConfig;
pub use crate::delay::WakeDelay;
pub use crate::event::{CaptureEvent, RestartReason, SupervisorState, TransmitEvent};
pub use crate::frame::{
    address_filter, validate_address, validate_bytes_sent, validate_packet, CapturedFrame,
    MacAddress,
};
pub use crate::io::{LinkCapture, LinkTransmit};
pub use crate::transmit::TransmitSupervisor;
pub use crate::worker::{ErrorEnvelope, ErrorInfo, FaultKind, TransmitReport};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RawLinkError {
    #[error("invalid address: {0}")]
    ValidateAddress(String),

    #[error("invalid packet: {0}")]
    ValidatePacket(String),

    #[error("incomplete send: {0}")]
    DataSendError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RawLinkError>;

// Constants
/// Link-layer address size in bytes.
pub const MAC_LEN: usize = 6;
/// The broadcast address, ff:ff:ff:ff:ff:ff.
pub const BROADCAST: [u8; MAC_LEN] = [0xFF; MAC_LEN];
/// Minimum valid packet size, excluding the address prefix.
pub const MIN_PACKET_LEN: usize = 8;
/// Maximum valid packet size, excluding the address prefix.
pub const MAX_PACKET_LEN: usize = 1508;

// Utility functions
pub fn init_logging() {
    env_logger::init();
}
