//! Protocol packet structure and encoding/decoding

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

use crate::{
    checksum,
    command::Command,
    error::{Error, Result},
};

/// A protocol packet: the 8-byte command header plus its payload.
///
/// Header fields, all little-endian u16, in wire order: command code,
/// checksum, session id, reply id. The checksum covers the whole packet
/// with its own field zeroed. The stream carrier wraps the encoded bytes
/// in an envelope, the datagram carrier sends them bare; the packet
/// itself is identical on both.
///
/// # Examples
///
/// ```
/// use bioterm_core::{Command, Packet};
///
/// let ping = Packet::new(Command::GetTime, 0x1234, 7);
/// let wire = ping.encode();
/// assert_eq!(Packet::decode(wire).unwrap(), ping);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command code
    pub command: Command,

    /// Session identifier (assigned by device on connect)
    pub session_id: u16,

    /// Reply identifier as it goes on the wire
    pub reply_id: u16,

    /// Packet payload (command-specific data)
    pub payload: Bytes,
}

impl Packet {
    /// Packet header size in bytes
    pub const HEADER_SIZE: usize = 8;

    /// Create a new packet with empty payload
    pub fn new(command: Command, session_id: u16, reply_id: u16) -> Self {
        Self {
            command,
            session_id,
            reply_id,
            payload: Bytes::new(),
        }
    }

    /// Create a packet with payload
    ///
    /// # Examples
    ///
    /// ```
    /// use bioterm_core::{Command, Packet};
    ///
    /// let packet = Packet::with_payload(Command::OptionsRrq, 99, 1, b"MAC\0".to_vec());
    /// assert_eq!(packet.payload.as_ref(), b"MAC\0");
    /// ```
    pub fn with_payload(
        command: Command,
        session_id: u16,
        reply_id: u16,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            command,
            session_id,
            reply_id,
            payload: payload.into(),
        }
    }

    /// Calculate checksum for this packet
    pub fn checksum(&self) -> u16 {
        checksum::calculate(
            self.command.into(),
            self.session_id,
            self.reply_id,
            &self.payload,
        )
    }

    /// Encode packet to bytes
    ///
    /// Writes the header with a zeroed checksum slot, appends the
    /// payload, then patches the computed checksum into bytes 2-3.
    ///
    /// # Examples
    ///
    /// ```
    /// use bioterm_core::{Command, Packet};
    ///
    /// let packet = Packet::with_payload(Command::TestVoice, 0x0A0B, 2, vec![0u8; 4]);
    /// assert_eq!(packet.encode().len(), 12);
    /// ```
    pub fn encode(&self) -> BytesMut {
        let mut wire = BytesMut::with_capacity(self.size());

        wire.extend_from_slice(&u16::from(self.command).to_le_bytes());
        wire.extend_from_slice(&[0, 0]);
        wire.extend_from_slice(&self.session_id.to_le_bytes());
        wire.extend_from_slice(&self.reply_id.to_le_bytes());
        wire.extend_from_slice(&self.payload);

        let checksum = self.checksum();
        wire[2..4].copy_from_slice(&checksum.to_le_bytes());

        wire
    }

    /// Decode packet from bytes
    ///
    /// # Errors
    ///
    /// Fails when the buffer cannot hold a header, when the command code
    /// is not one the protocol defines, or when the stored checksum does
    /// not match the one computed over the frame.
    pub fn decode(mut buf: BytesMut) -> Result<Self> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(Error::PacketTooShort {
                expected: Self::HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let word = |data: &BytesMut, at: usize| u16::from_le_bytes([data[at], data[at + 1]]);

        let command = Command::try_from(word(&buf, 0))?;
        let received = word(&buf, 2);
        let session_id = word(&buf, 4);
        let reply_id = word(&buf, 6);

        buf.advance(Self::HEADER_SIZE);
        let payload = buf.freeze();

        let expected =
            checksum::calculate(command.into(), session_id, reply_id, &payload);
        if expected != received {
            return Err(Error::ChecksumMismatch { expected, received });
        }

        Ok(Self {
            command,
            session_id,
            reply_id,
            payload,
        })
    }

    /// Check if this is a response packet (ACK)
    pub fn is_response(&self) -> bool {
        self.command.is_response()
    }

    /// Check if this reply counts as success
    pub fn is_ok(&self) -> bool {
        self.command.is_ok()
    }

    /// Get total packet size
    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet {{ {} session=0x{:04x} reply={} payload={}B checksum=0x{:04x} }}",
            self.command,
            self.session_id,
            self.reply_id,
            self.payload.len(),
            self.checksum(),
        )
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to session 0x{:04x} ({} payload bytes)",
            self.command.name(),
            self.session_id,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connect_wire_bytes() {
        // First packet of a session: command=1000, session=0, reply=65534
        let packet = Packet::new(Command::Connect, 0, 65534);
        let encoded = packet.encode();

        assert_eq!(
            encoded.as_ref(),
            &[0xE8, 0x03, 0x18, 0xFC, 0x00, 0x00, 0xFE, 0xFF]
        );
    }

    #[test]
    fn test_round_trip_with_payload() {
        let sent = Packet::with_payload(Command::OptionsRrq, 0x04D2, 3, b"~Platform\0".to_vec());

        let received = Packet::decode(sent.encode()).unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn test_header_only_round_trip() {
        let sent = Packet::new(Command::FreeData, 0xBEEF, 42);
        let wire = sent.encode();

        assert_eq!(wire.len(), Packet::HEADER_SIZE);
        assert_eq!(Packet::decode(wire).unwrap(), sent);
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut wire = Packet::with_payload(Command::Data, 9, 9, vec![1, 2, 3, 4]).encode();

        // Flip one payload bit; the stored checksum is now stale
        wire[10] ^= 0x40;

        assert!(matches!(
            Packet::decode(wire),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        for len in 0..Packet::HEADER_SIZE {
            let result = Packet::decode(BytesMut::from(&vec![0u8; len][..]));
            assert!(
                matches!(result, Err(Error::PacketTooShort { .. })),
                "len={len}"
            );
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut wire = Packet::new(Command::Connect, 0, 0).encode();
        wire[0..2].copy_from_slice(&4242u16.to_le_bytes());

        assert!(matches!(
            Packet::decode(wire),
            Err(Error::UnknownCommand(4242))
        ));
    }

    #[test]
    fn test_big_payload_survives() {
        let blob: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let packet = Packet::with_payload(Command::Data, 77, 11, blob.clone());

        assert_eq!(packet.size(), Packet::HEADER_SIZE + blob.len());

        let decoded = Packet::decode(packet.encode()).unwrap();
        assert_eq!(decoded.payload.as_ref(), blob.as_slice());
    }

    #[test]
    fn test_is_ok() {
        assert!(Packet::new(Command::AckOk, 0, 0).is_ok());
        assert!(Packet::new(Command::Data, 0, 0).is_ok());
        assert!(Packet::new(Command::PrepareData, 0, 0).is_ok());
        assert!(!Packet::new(Command::AckError, 0, 0).is_ok());
    }
}
