//! Scripted in-memory transport for exercising command flows in tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;

use bioterm_core::Packet;
use bioterm_transport::{Error, Result, Transport};

/// Shared view of the frames a [`MockTransport`] has sent
pub(crate) type SentLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// A transport that records everything sent and plays back a queue of
/// canned reply frames. An empty queue behaves like a receive timeout.
pub(crate) struct MockTransport {
    sent: SentLog,
    pub replies: VecDeque<BytesMut>,
    stream: bool,
    chunk: usize,
    connected: bool,
}

impl MockTransport {
    pub fn new(stream: bool) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            replies: VecDeque::new(),
            stream,
            chunk: if stream { 0xFFC0 } else { 16384 },
            connected: false,
        }
    }

    /// Shrink the chunk ceiling to force multi-chunk transfers
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn push_reply(&mut self, packet: Packet) {
        self.replies.push_back(packet.encode());
    }

    /// Handle for inspecting sent frames after the device takes the
    /// transport over
    pub fn sent_log(&self) -> SentLog {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn recv_frame(&mut self, _timeout: Duration) -> Result<BytesMut> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.replies.pop_front().ok_or(Error::ReadTimeout)
    }

    fn remote_addr(&self) -> String {
        "mock:4370".to_string()
    }

    fn is_stream(&self) -> bool {
        self.stream
    }

    fn max_chunk(&self) -> usize {
        self.chunk
    }
}

/// Decode a frame captured by the mock back into a packet
pub(crate) fn sent_packet(frame: &[u8]) -> Packet {
    Packet::decode(BytesMut::from(frame)).expect("sent frame must decode")
}

/// Decode every captured frame
pub(crate) fn sent_packets(log: &SentLog) -> Vec<Packet> {
    log.lock().unwrap().iter().map(|f| sent_packet(f)).collect()
}
