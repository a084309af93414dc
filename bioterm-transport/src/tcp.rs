//! Stream (TCP) transport
//!
//! Every packet is wrapped in an 8-byte envelope: the two magic words
//! 0x5050, 0x8217 and a u32 little-endian payload length. Inbound bytes
//! are accumulated across reads until a complete frame is buffered; bytes
//! beyond the frame stay queued for the next call, so unsolicited frames
//! pushed by the device are never lost between requests.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

use bioterm_core::constants::{ENVELOPE_SIZE, TCP_MAGIC_1, TCP_MAGIC_2};

use crate::{error::*, Transport};

/// Largest frame the accumulator will accept; anything bigger is treated
/// as a corrupted envelope rather than a buffer to grow into.
const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Stream transport for the terminals' TCP port
pub struct TcpTransport {
    addr: String,
    port: u16,
    socket_addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    rx: BytesMut,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create new TCP transport
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            socket_addr: None,
            stream: None,
            rx: BytesMut::with_capacity(4096),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve address to SocketAddr
    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.socket_addr {
            return Ok(addr);
        }

        let addr_str = format!("{}:{}", self.addr, self.port);

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr_str, e)))?
            .collect();

        let addr = addrs
            .first()
            .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr_str)))?;

        self.socket_addr = Some(*addr);
        Ok(*addr)
    }

    /// Try to peel one complete frame off the accumulator.
    fn extract_frame(&mut self) -> Result<Option<BytesMut>> {
        if self.rx.len() < ENVELOPE_SIZE {
            return Ok(None);
        }

        let first = u16::from_le_bytes([self.rx[0], self.rx[1]]);
        let second = u16::from_le_bytes([self.rx[2], self.rx[3]]);
        if first != TCP_MAGIC_1 || second != TCP_MAGIC_2 {
            return Err(Error::BadMagic { first, second });
        }

        let length = u32::from_le_bytes([self.rx[4], self.rx[5], self.rx[6], self.rx[7]]);
        // The length counts the 8-byte packet header plus its payload
        if (length as usize) < 8 || length as usize > MAX_FRAME_SIZE {
            return Err(Error::BadFrameLength(length));
        }

        let length = length as usize;
        if self.rx.len() < ENVELOPE_SIZE + length {
            self.rx.reserve(ENVELOPE_SIZE + length - self.rx.len());
            return Ok(None);
        }

        self.rx.advance(ENVELOPE_SIZE);
        Ok(Some(self.rx.split_to(length)))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let addr = self.resolve_addr().await?;

        debug!("Connecting to {}...", addr);

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::Io)?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);

        self.rx.clear();
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Disconnecting from {}...", self.remote_addr());

            // Graceful shutdown
            let _ = stream.shutdown().await;
        }

        self.socket_addr = None;
        self.rx.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let mut wire = BytesMut::with_capacity(ENVELOPE_SIZE + frame.len());
        wire.put_u16_le(TCP_MAGIC_1);
        wire.put_u16_le(TCP_MAGIC_2);
        wire.put_u32_le(frame.len() as u32);
        wire.put_slice(frame);

        trace!(
            "Sending {} bytes: {:02X?}",
            wire.len(),
            &wire[..wire.len().min(24)]
        );

        stream.write_all(&wire).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn recv_frame(&mut self, deadline: Duration) -> Result<BytesMut> {
        let expires = Instant::now() + deadline;

        loop {
            if let Some(frame) = self.extract_frame()? {
                trace!(
                    "Received frame, {} bytes: {:02X?}",
                    frame.len(),
                    &frame[..frame.len().min(16)]
                );
                return Ok(frame);
            }

            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

            let remaining = expires
                .checked_duration_since(Instant::now())
                .ok_or(Error::ReadTimeout)?;

            let n = timeout(remaining, stream.read_buf(&mut self.rx))
                .await
                .map_err(|_| Error::ReadTimeout)?
                .map_err(Error::Io)?;

            if n == 0 {
                warn!("Connection closed while waiting for a frame");
                return Err(Error::ConnectionClosed);
            }
        }
    }

    fn remote_addr(&self) -> String {
        self.socket_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| format!("{}:{}", self.addr, self.port))
    }

    fn is_stream(&self) -> bool {
        true
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("TCP transport dropped while still connected");
        }
    }
}
