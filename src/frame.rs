//! Addresses and frame validation
//!
//! This module contains the link-layer address type, the validation
//! functions guarding the wire-format contracts, and the view type handed
//! to owners for every captured frame.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{RawLinkError, Result, BROADCAST, MAC_LEN, MAX_PACKET_LEN, MIN_PACKET_LEN};

/// A 6-byte link-layer destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; MAC_LEN]);

impl MacAddress {
    /// The broadcast address, ff:ff:ff:ff:ff:ff.
    pub const BROADCAST: MacAddress = MacAddress(BROADCAST);

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; MAC_LEN] {
        &self.0
    }

    /// Whether this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl Default for MacAddress {
    fn default() -> Self {
        Self::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl From<[u8; MAC_LEN]> for MacAddress {
    fn from(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for MacAddress {
    type Error = RawLinkError;

    fn try_from(buf: &[u8]) -> Result<Self> {
        validate_address(buf)
    }
}

/// Validate a destination address buffer.
///
/// The address must be exactly [`MAC_LEN`] bytes.
pub fn validate_address(buf: &[u8]) -> Result<MacAddress> {
    if buf.len() != MAC_LEN {
        return Err(RawLinkError::ValidateAddress(format!(
            "address must be {} bytes, got {} ({})",
            MAC_LEN,
            buf.len(),
            hex(buf)
        )));
    }
    let mut address = [0u8; MAC_LEN];
    address.copy_from_slice(buf);
    Ok(MacAddress(address))
}

/// Validate an outbound packet buffer, passing it through unchanged.
///
/// The packet excludes the address prefix and must be between
/// [`MIN_PACKET_LEN`] and [`MAX_PACKET_LEN`] bytes inclusive.
pub fn validate_packet(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < MIN_PACKET_LEN {
        return Err(RawLinkError::ValidatePacket(format!(
            "packet must be at least {} bytes, got {} ({})",
            MIN_PACKET_LEN,
            buf.len(),
            hex(buf)
        )));
    }
    if buf.len() > MAX_PACKET_LEN {
        return Err(RawLinkError::ValidatePacket(format!(
            "packet must be at most {} bytes, got {}",
            MAX_PACKET_LEN,
            buf.len()
        )));
    }
    Ok(buf)
}

/// Check the byte count reported for a completed send.
///
/// The count includes the 6-byte address prefix the worker prepends, so it
/// is reduced by [`MAC_LEN`] before being compared against the stored
/// packet length. Returns the adjusted count on a full send.
pub fn validate_bytes_sent(bytes_sent: usize, packet_len: usize) -> Result<usize> {
    let sent = bytes_sent.checked_sub(MAC_LEN).ok_or_else(|| {
        RawLinkError::DataSendError(format!(
            "sent {} bytes, less than the {}-byte address prefix",
            bytes_sent, MAC_LEN
        ))
    })?;
    if sent != packet_len {
        return Err(RawLinkError::DataSendError(format!(
            "packet sent incompletely: {} of {} bytes",
            sent, packet_len
        )));
    }
    Ok(sent)
}

/// Whether the first 6 bytes of `frame` equal `address`.
///
/// Owners use this to decide relevance of a captured frame; pass
/// `MacAddress::default()` to match broadcast traffic. Frames shorter than
/// an address never match.
pub fn address_filter(frame: &[u8], address: MacAddress) -> bool {
    frame.len() >= MAC_LEN && frame[..MAC_LEN] == address.0
}

/// One frame captured off the wire.
///
/// Holds the raw address-prefixed bytes; the payload view strips the prefix
/// without copying.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    raw: Bytes,
}

impl CapturedFrame {
    pub(crate) fn new(raw: Bytes) -> Self {
        debug_assert!(raw.len() >= MAC_LEN);
        Self { raw }
    }

    /// The full frame as captured, address prefix included.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The frame payload with the address prefix stripped. Zero-copy.
    pub fn payload(&self) -> Bytes {
        self.raw.slice(MAC_LEN..)
    }

    /// The destination address the frame was sent to.
    pub fn destination(&self) -> MacAddress {
        let mut address = [0u8; MAC_LEN];
        address.copy_from_slice(&self.raw[..MAC_LEN]);
        MacAddress(address)
    }

    /// Whether the frame is addressed to `address`.
    pub fn matches(&self, address: MacAddress) -> bool {
        address_filter(&self.raw, address)
    }

    /// Whether the frame is addressed to broadcast.
    pub fn matches_broadcast(&self) -> bool {
        self.matches(MacAddress::BROADCAST)
    }

    /// Consume the view, returning the raw bytes.
    pub fn into_raw(self) -> Bytes {
        self.raw
    }
}

fn hex(buf: &[u8]) -> String {
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}
