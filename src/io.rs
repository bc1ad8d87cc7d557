//! Link-layer I/O boundary
//!
//! The privileged primitives that actually touch the interface are out of
//! scope for this crate; these traits define their contract. An embedder
//! implements them over its native capture/transmit library, typically by
//! moving the blocking call onto a blocking-friendly executor slot so that
//! the worker task suspends instead of stalling its thread.

use async_trait::async_trait;

/// Source of captured frames for one network interface.
#[async_trait]
pub trait LinkCapture: Send + Sync + 'static {
    /// Resolve with the next frame read from `interface`.
    ///
    /// The returned buffer is the raw wire frame: the first 6 bytes are the
    /// destination address. At most one call is in flight per worker.
    async fn capture_frame(&self, interface: &str) -> std::io::Result<Vec<u8>>;
}

/// Sink for outbound frames on one network interface.
#[async_trait]
pub trait LinkTransmit: Send + Sync + 'static {
    /// Send one frame on `interface`, resolving with the number of bytes
    /// written. `frame` includes the 6-byte address prefix.
    async fn transmit_frame(&self, interface: &str, frame: &[u8]) -> std::io::Result<usize>;
}
