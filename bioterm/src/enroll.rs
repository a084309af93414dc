//! Fingerprint enrollment
//!
//! Enrollment is the other flow that breaks the request/reply rhythm:
//! after `CMD_STARTENROLL` the device pushes a pair of frames per scan
//! round (finger placed, scan result), each of which the host must ack.
//! The result code of the second frame drives the state machine: 0x64
//! asks for another scan, 0x00 is success, anything else aborts.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use bioterm_core::Command;
use bioterm_transport::Transport;
use bioterm_types::user::put_string;

use crate::device::Device;
use crate::error::{Error, Result};

/// Scan rounds granted before enrollment gives up
const ENROLL_ROUNDS: usize = 3;

/// Fingers take a while; the per-frame deadline is generous
const ENROLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Result code meaning "scan again"
const ENROLL_RESCAN: u16 = 0x64;

/// Outcome of a successful enrollment
#[derive(Debug, Clone)]
pub struct Enrollment {
    /// Result code of the final scan event (0 on success)
    pub status: u16,

    /// The final event frame verbatim, for callers that want the
    /// undocumented trailing fields
    pub raw: Bytes,
}

impl Device {
    /// Enroll a fingerprint for `user_id` at finger slot `fid`.
    ///
    /// The user interacts with the terminal while this runs; the method
    /// returns when the device reports success, refuses, or the scan
    /// rounds are exhausted. The device is put back into verification
    /// mode on every exit path.
    pub async fn enroll_user(&mut self, user_id: &str, fid: u8) -> Result<Enrollment> {
        self.ensure_connected()?;

        if fid > 9 {
            return Err(Error::Operation(format!(
                "finger index {fid} out of range 0-9"
            )));
        }

        self.cancel_capture().await?;

        let payload = if self.transport.is_stream() {
            let mut buf = BytesMut::with_capacity(26);
            put_string(&mut buf, user_id, 24);
            buf.put_u8(fid);
            buf.put_u8(1);
            buf.freeze()
        } else {
            // The datagram form only carries numeric identifiers
            let numeric: u32 = user_id.parse().map_err(|_| {
                Error::Operation(format!(
                    "this carrier only enrolls numeric user ids, got {user_id:?}"
                ))
            })?;
            let mut buf = BytesMut::with_capacity(5);
            buf.put_u32_le(numeric);
            buf.put_u8(fid);
            buf.freeze()
        };

        info!(user_id, fid, "starting enrollment");
        self.exec_ok(Command::StartEnroll, payload).await?;

        let outcome = self.enroll_rounds().await;

        // Whatever happened, stop pushing events and resume verification
        if let Err(e) = self.reg_event(0).await {
            warn!("event deregistration after enrollment failed: {}", e);
        }
        if let Err(e) = self.cancel_capture().await {
            warn!("cancel-capture after enrollment failed: {}", e);
        }
        if let Err(e) = self.start_verify().await {
            warn!("start-verify after enrollment failed: {}", e);
        }

        outcome
    }

    async fn enroll_rounds(&mut self) -> Result<Enrollment> {
        for round in 1..=ENROLL_ROUNDS {
            // Finger-placed event
            let _placed = self.recv_raw(ENROLL_TIMEOUT).await?;
            self.ack_ok().await?;

            // Scan-result event; the code sits in the first payload word
            let result = self.recv_raw(ENROLL_TIMEOUT).await?;
            self.ack_ok().await?;

            let raw = Bytes::copy_from_slice(&result);
            let status = enroll_status(&raw).ok_or_else(|| {
                Error::Protocol(format!(
                    "enrollment event too short ({} bytes)",
                    raw.len()
                ))
            })?;

            match status {
                0 => {
                    info!(round, "enrollment succeeded");
                    return Ok(Enrollment { status, raw });
                }
                ENROLL_RESCAN => {
                    debug!(round, "device requests another scan");
                }
                code => {
                    return Err(Error::Operation(format!(
                        "enrollment refused with status 0x{code:02X}"
                    )));
                }
            }
        }

        Err(Error::Operation(format!(
            "enrollment still unfinished after {ENROLL_ROUNDS} scans"
        )))
    }
}

/// Result code of a pushed enrollment frame: the u16 straight after the
/// 8-byte packet header.
fn enroll_status(frame: &[u8]) -> Option<u16> {
    if frame.len() < 10 {
        return None;
    }
    Some(u16::from_le_bytes([frame[8], frame[9]]))
}
