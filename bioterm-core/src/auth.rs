//! Authentication key derivation
//!
//! Devices with a communication password reply to the connect command with
//! CMD_ACK_UNAUTH. The host then scrambles the password with the assigned
//! session id and sends the result in CMD_AUTH.

use bytes::Bytes;

/// Derive the authentication key from password and session id
///
/// The scramble works on the low 32 bits of the password:
///
/// 1. mirror the bits (bit 0 ends up at bit 31)
/// 2. add the session id
/// 3. xor with the ASCII bytes `Z`, `K`, `S`, `O`
/// 4. swap the two 16-bit halves
/// 5. mix in the ticks byte: bytes 0, 1 and 3 are xored with it, byte 2
///    is replaced by it
///
/// # Arguments
///
/// * `password` - The communication password (usually 0)
/// * `session_id` - The session id from the CMD_ACK_UNAUTH response
/// * `ticks` - Ticks value (50 in practice)
///
/// # Examples
///
/// ```
/// use bioterm_core::auth;
///
/// let key = auth::make_commkey(0, 32031, 50);
/// assert_eq!(key.len(), 4);
/// ```
pub fn make_commkey(password: u32, session_id: u16, ticks: u8) -> Bytes {
    // Steps 1-4 collapse into word arithmetic: the per-byte xor is one
    // word xor in little-endian, and the half swap is a 16-bit rotation
    let scrambled = (password.reverse_bits().wrapping_add(session_id as u32)
        ^ u32::from_le_bytes(*b"ZKSO"))
    .rotate_left(16);

    let mut key = scrambled.to_le_bytes();
    key[0] ^= ticks;
    key[1] ^= ticks;
    key[2] = ticks;
    key[3] ^= ticks;

    Bytes::copy_from_slice(&key)
}
