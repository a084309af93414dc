//! Packet checksum algorithm
//!
//! 1. Build buffer: [Command, 0x00, 0x00, SessionID, ReplyID, Payload]
//! 2. Sum as unsigned 16-bit little-endian values; a trailing odd byte is
//!    sign-extended to 16 bits
//! 3. While sum > 0xFFFF, subtract 0xFFFF
//! 4. Take ones-complement: ~sum
//! 5. Return as unsigned 16-bit

use tracing::trace;

/// Calculate the packet checksum
///
/// The checksum field itself is zero during computation; the reply id must
/// be the value that actually goes on the wire.
///
/// # Examples
///
/// ```
/// use bioterm_core::checksum;
///
/// let checksum = checksum::calculate(1000, 0, 0, &[]);
/// println!("Checksum: 0x{:04X}", checksum);
/// ```
pub fn calculate(command: u16, session_id: u16, reply_id: u16, payload: &[u8]) -> u16 {
    // Build complete buffer for checksum calculation
    let mut buf = Vec::with_capacity(8 + payload.len());

    // Header (checksum field is 0x0000 for calculation)
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&[0, 0]); // Checksum placeholder
    buf.extend_from_slice(&session_id.to_le_bytes());
    buf.extend_from_slice(&reply_id.to_le_bytes());
    buf.extend_from_slice(payload);

    // Sum as 16-bit words
    let mut sum: u32 = 0;

    for chunk in buf.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_le_bytes([chunk[0], chunk[1]]) as u32
        } else {
            // Trailing odd byte, sign-extended to 16 bits
            (chunk[0] as i8 as i16 as u16) as u32
        };

        sum = sum.wrapping_add(word);

        // Fold back into 16 bits
        while sum > 0xFFFF {
            sum = sum.wrapping_sub(0xFFFF);
        }
    }

    // Ones complement
    let checksum = !sum as u16;

    trace!(
        command = command,
        session_id = session_id,
        reply_id = reply_id,
        payload_len = payload.len(),
        checksum = format!("0x{:04X}", checksum),
        "Calculated checksum"
    );

    checksum
}

/// Verify a received checksum
pub fn verify(
    command: u16,
    session_id: u16,
    reply_id: u16,
    payload: &[u8],
    expected: u16,
) -> bool {
    let calculated = calculate(command, session_id, reply_id, payload);
    calculated == expected
}
