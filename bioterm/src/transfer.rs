//! Buffered bulk transfer
//!
//! Enumerations (users, templates, attendance, raw tables) share one
//! device-side staging pattern: `CMD_PREPARE_BUFFER` allocates a buffer
//! and announces its size, `CMD_READ_BUFFER` streams it out in chunks,
//! `CMD_FREE_DATA` releases it. Small result sets short-circuit: the
//! prepare reply is a `CMD_DATA` frame carrying the whole payload inline.
//!
//! Uploads run the pattern in reverse: `CMD_PREPARE_DATA` announces the
//! total, then `CMD_DATA` frames of at most 1024 bytes carry it up.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use bioterm_core::constants::{MAX_CHUNK_UPLOAD, MAX_RETRIES};
use bioterm_core::{Command, Packet};
use bioterm_transport::Transport;

use crate::device::Device;
use crate::error::{Error, Result};

/// Split a transfer of `total` bytes into `(start, size)` spans of at
/// most `max_chunk` bytes.
pub(crate) fn chunk_spans(total: usize, max_chunk: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::with_capacity(total / max_chunk + 1);
    let mut start = 0;

    while start < total {
        let size = max_chunk.min(total - start);
        spans.push((start, size));
        start += size;
    }

    spans
}

impl Device {
    /// Read a whole table through the device-side staging buffer.
    ///
    /// `command` selects the table, `fct`/`ext` qualify it. The staging
    /// buffer is released on every exit path.
    pub(crate) async fn read_with_buffer(
        &mut self,
        command: Command,
        fct: i32,
        ext: i32,
    ) -> Result<Bytes> {
        let mut req = BytesMut::with_capacity(11);
        req.put_u8(1);
        req.put_i16_le(u16::from(command) as i16);
        req.put_i32_le(fct);
        req.put_i32_le(ext);

        debug!(%command, fct, ext, "buffered read");

        let reply = self.exec(Command::PrepareBuffer, req.freeze()).await?;
        let result = self.read_buffer_body(reply).await;

        // Release the staging buffer even after a failed read
        if let Err(e) = self.free_data().await {
            warn!("free-data after buffered read failed: {}", e);
        }

        result
    }

    async fn read_buffer_body(&mut self, reply: Packet) -> Result<Bytes> {
        match reply.command {
            // Small payloads arrive inline
            Command::Data => Ok(reply.payload),

            Command::AckOk => {
                if reply.payload.len() < 5 {
                    return Err(Error::Protocol(format!(
                        "prepare-buffer ack carries {} bytes, need 5",
                        reply.payload.len()
                    )));
                }

                // Total length sits at bytes 1-4 of the ack payload
                let total = u32::from_le_bytes([
                    reply.payload[1],
                    reply.payload[2],
                    reply.payload[3],
                    reply.payload[4],
                ]) as usize;

                debug!(total, "staged transfer");

                if total == 0 {
                    return Ok(Bytes::new());
                }

                let mut data = BytesMut::with_capacity(total);
                for (start, size) in chunk_spans(total, self.transport.max_chunk()) {
                    let chunk = self.read_chunk(start, size).await?;
                    data.extend_from_slice(&chunk);
                }

                Ok(data.freeze())
            }

            other => Err(Error::Protocol(format!(
                "prepare-buffer answered {}",
                other
            ))),
        }
    }

    /// Read one chunk of the staging buffer, retrying the read a few
    /// times; some firmware drops chunk replies under load.
    async fn read_chunk(&mut self, start: usize, size: usize) -> Result<Bytes> {
        let mut req = BytesMut::with_capacity(8);
        req.put_i32_le(start as i32);
        req.put_i32_le(size as i32);
        let req = req.freeze();

        let mut last_err = None;
        for attempt in 1..=MAX_RETRIES {
            if attempt > 1 {
                debug!(attempt, start, "retrying chunk read");
            }

            match self.try_read_chunk(req.clone(), size).await {
                Ok(chunk) => return Ok(chunk),
                Err(e) => {
                    warn!(start, size, "chunk read failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.expect("at least one chunk attempt ran"))
    }

    async fn try_read_chunk(&mut self, req: Bytes, size: usize) -> Result<Bytes> {
        let reply = self.exec(Command::ReadBuffer, req).await?;

        match reply.command {
            Command::Data => {
                if reply.payload.len() != size {
                    return Err(Error::Protocol(format!(
                        "chunk reply carries {} bytes, requested {}",
                        reply.payload.len(),
                        size
                    )));
                }
                Ok(reply.payload)
            }

            // Some firmware stages even single chunks behind prepare-data
            Command::PrepareData => self.recv_prepared(size).await,

            other => Err(Error::Protocol(format!("read-buffer answered {}", other))),
        }
    }

    /// Collect a burst of `CMD_DATA` frames totalling `size` bytes,
    /// closed by an ack.
    pub(crate) async fn recv_prepared(&mut self, size: usize) -> Result<Bytes> {
        let mut data = BytesMut::with_capacity(size);

        while data.len() < size {
            let frame = self.recv_reply().await?;
            match frame.command {
                Command::Data => data.extend_from_slice(&frame.payload),
                other => {
                    return Err(Error::Protocol(format!(
                        "expected data frame, got {} after {} of {} bytes",
                        other,
                        data.len(),
                        size
                    )))
                }
            }
        }

        let ack = self.recv_reply().await?;
        if ack.command != Command::AckOk {
            debug!("data burst closed by {}", ack.command);
        }

        data.truncate(size);
        Ok(data.freeze())
    }

    /// Release the device-side staging buffer
    pub(crate) async fn free_data(&mut self) -> Result<()> {
        self.exec_ok(Command::FreeData, Bytes::new()).await?;
        Ok(())
    }

    /// Upload a payload through the prepare-data path: free any stale
    /// buffer, announce the total, then push 1024-byte chunks.
    pub(crate) async fn send_with_buffer(&mut self, data: &[u8]) -> Result<()> {
        self.free_data().await?;

        let mut req = BytesMut::with_capacity(4);
        req.put_u32_le(data.len() as u32);
        self.exec_ok(Command::PrepareData, req.freeze()).await?;

        for chunk in data.chunks(MAX_CHUNK_UPLOAD) {
            self.exec_ok(Command::Data, chunk.to_vec()).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{sent_packets, MockTransport};
    use bioterm_core::constants::MAX_CHUNK_STREAM;
    use pretty_assertions::assert_eq;

    fn prepare_ack(session: u16, total: u32) -> Packet {
        let mut payload = vec![0u8; 5];
        payload[1..5].copy_from_slice(&total.to_le_bytes());
        Packet::with_payload(Command::AckOk, session, 0, payload)
    }

    #[test]
    fn test_chunk_spans_with_remainder() {
        let spans = chunk_spans(0x12345, MAX_CHUNK_STREAM);
        assert_eq!(spans, vec![(0, 0xFFC0), (0xFFC0, 0x2385)]);
    }

    #[test]
    fn test_chunk_spans_exact_multiple() {
        let spans = chunk_spans(32, 16);
        assert_eq!(spans, vec![(0, 16), (16, 16)]);
    }

    #[test]
    fn test_chunk_spans_small_and_empty() {
        assert_eq!(chunk_spans(5, 16), vec![(0, 5)]);
        assert_eq!(chunk_spans(0, 16), Vec::new());
    }

    #[tokio::test]
    async fn test_inline_data_reply() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::with_payload(Command::Data, 1, 0, vec![9u8; 12]));
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // free-data

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let data = device
            .read_with_buffer(Command::AttLogRrq, 0, 0)
            .await
            .unwrap();
        assert_eq!(data.as_ref(), &[9u8; 12]);
    }

    #[tokio::test]
    async fn test_chunked_read_reassembles() {
        // 20 bytes over an 8-byte chunk ceiling: 8 + 8 + 4
        let body: Vec<u8> = (0u8..20).collect();

        let mut mock = MockTransport::new(true).with_chunk(8);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(prepare_ack(1, 20));
        for chunk in body.chunks(8) {
            mock.push_reply(Packet::with_payload(Command::Data, 1, 0, chunk.to_vec()));
        }
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // free-data

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let data = device
            .read_with_buffer(Command::UserTempRrq, 5, 0)
            .await
            .unwrap();
        assert_eq!(data.as_ref(), body.as_slice());
    }

    #[tokio::test]
    async fn test_chunk_read_requests_expected_spans() {
        let mut mock = MockTransport::new(true).with_chunk(8);
        let log = mock.sent_log();
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(prepare_ack(1, 12));
        mock.push_reply(Packet::with_payload(Command::Data, 1, 0, vec![0u8; 8]));
        mock.push_reply(Packet::with_payload(Command::Data, 1, 0, vec![0u8; 4]));
        mock.push_reply(Packet::new(Command::AckOk, 1, 0));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();
        device
            .read_with_buffer(Command::AttLogRrq, 0, 0)
            .await
            .unwrap();

        // sent: CONNECT, PREPARE_BUFFER, READ x2, FREE
        let sent = sent_packets(&log);
        assert_eq!(sent[1].command, Command::PrepareBuffer);
        assert_eq!(sent[1].payload.len(), 11);
        assert_eq!(sent[2].command, Command::ReadBuffer);
        assert_eq!(
            sent[2].payload.as_ref(),
            &[0, 0, 0, 0, 8, 0, 0, 0] // start=0, size=8
        );
        assert_eq!(
            sent[3].payload.as_ref(),
            &[8, 0, 0, 0, 4, 0, 0, 0] // start=8, size=4
        );
        assert_eq!(sent[4].command, Command::FreeData);
    }

    #[tokio::test]
    async fn test_failed_read_still_frees_buffer() {
        let mut mock = MockTransport::new(true).with_chunk(8);
        let log = mock.sent_log();
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(prepare_ack(1, 8));
        // No chunk replies queued: every retry times out. The trailing
        // free-data send is what this test is after; its reply times out
        // too, which the read path tolerates.

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let result = device.read_with_buffer(Command::AttLogRrq, 0, 0).await;
        assert!(result.is_err());

        let sent = sent_packets(&log);
        assert_eq!(sent.last().unwrap().command, Command::FreeData);
    }

    #[tokio::test]
    async fn test_send_with_buffer_chunks_upload() {
        let mut mock = MockTransport::new(true);
        let log = mock.sent_log();
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // free
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // prepare
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // chunk 1
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // chunk 2

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let payload = vec![7u8; 1500];
        device.send_with_buffer(&payload).await.unwrap();

        let sent = sent_packets(&log);
        assert_eq!(sent[1].command, Command::FreeData);
        assert_eq!(sent[2].command, Command::PrepareData);
        assert_eq!(sent[2].payload.as_ref(), &1500u32.to_le_bytes());
        assert_eq!(sent[3].command, Command::Data);
        assert_eq!(sent[3].payload.len(), 1024);
        assert_eq!(sent[4].payload.len(), 476);
    }
}
