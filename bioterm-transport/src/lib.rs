//! Transport layer for the biometric terminal protocol
//!
//! Two interchangeable carriers behind one trait: a stream carrier (TCP,
//! packets wrapped in an 8-byte magic+length envelope) and a datagram
//! carrier (UDP, packets sent bare). Both deliver whole frames — the
//! stream side buffers partial reads until a complete frame is available.
//!
//! The transport is strictly serial: at most one request may be
//! outstanding. [`Transport::recv_frame`] doubles as the raw-receive
//! primitive for the realtime flows, which consume unsolicited frames the
//! device pushes between host requests.

pub mod error;
pub mod tcp;
pub mod udp;

pub use error::{Error, Result};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;

use bioterm_core::constants::{MAX_CHUNK_DATAGRAM, MAX_CHUNK_STREAM};

/// Frame-level transport to a device
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to device
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from device
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send one protocol frame (header + payload, no envelope)
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive the next whole protocol frame, waiting up to `timeout`.
    ///
    /// Called without a preceding send this drains unsolicited frames.
    async fn recv_frame(&mut self, timeout: Duration) -> Result<BytesMut>;

    /// Get remote address
    fn remote_addr(&self) -> String;

    /// Whether this carrier is stream-based (selects the wide user layout
    /// optimistically and the larger read-chunk ceiling)
    fn is_stream(&self) -> bool;

    /// Largest buffered-read chunk this carrier supports
    fn max_chunk(&self) -> usize {
        if self.is_stream() {
            MAX_CHUNK_STREAM
        } else {
            MAX_CHUNK_DATAGRAM
        }
    }
}
