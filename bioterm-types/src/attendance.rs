//! Attendance rows
//!
//! Three record widths are observed in the attendance table, depending on
//! firmware generation:
//!
//! - 8 bytes:  `uid:u16 @0, status:u8 @2, time:u32 @3, punch:u8 @7`
//! - 16 bytes: `user-id:u32 @0, time:u32 @4, status:u8 @8, punch:u8 @9`
//! - anything else (40 in the wild): `uid:u16 @0, user-id:24-byte string
//!   @2, status:u8 @26, time:u32 @27, punch:u8 @31`
//!
//! The width is derived from the advertised record count, not sniffed per
//! record.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use bioterm_core::constants::{PunchType, VerifyMode};
use bioterm_core::time::decode_time;

use crate::error::{Error, Result};
use crate::user::string_field;

/// One attendance punch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    /// Device-local record index; 0 when the row only carries a user id
    pub uid: u16,

    /// Application-level user identifier
    pub user_id: String,

    /// Verification status byte as reported by the device
    pub status: u8,

    /// Punch (check-in/out) byte as reported by the device
    pub punch: u8,

    pub timestamp: NaiveDateTime,
}

impl Attendance {
    /// The documented punch code, when the raw byte carries one
    pub fn punch_type(&self) -> Option<PunchType> {
        PunchType::from_raw(self.punch)
    }

    /// The documented verification mode, when the raw byte carries one
    pub fn verify_mode(&self) -> Option<VerifyMode> {
        VerifyMode::from_raw(self.status)
    }

    /// Parse an attendance buffer of `record_size`-wide rows.
    ///
    /// Rows whose timestamp does not decode are skipped with a warning;
    /// flash corruption on these devices is routine and one bad row must
    /// not hide the rest of the log.
    pub fn parse_all(data: &[u8], record_size: usize) -> Result<Vec<Self>> {
        // The fallback shape reads up to offset 31
        if record_size < 8 || (record_size != 8 && record_size != 16 && record_size < 32) {
            return Err(Error::Parse(format!(
                "impossible attendance record size {record_size}"
            )));
        }

        let mut rows = Vec::with_capacity(data.len() / record_size);

        for record in data.chunks_exact(record_size) {
            let (uid, user_id, status, raw_time, punch) = match record_size {
                8 => {
                    let uid = u16::from_le_bytes([record[0], record[1]]);
                    let time = u32::from_le_bytes([record[3], record[4], record[5], record[6]]);
                    (uid, uid.to_string(), record[2], time, record[7])
                }
                16 => {
                    let user_id =
                        u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
                    let time = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
                    (0, user_id.to_string(), record[8], time, record[9])
                }
                _ => {
                    let uid = u16::from_le_bytes([record[0], record[1]]);
                    let user_id = string_field(&record[2..26]);
                    let time =
                        u32::from_le_bytes([record[27], record[28], record[29], record[30]]);
                    (uid, user_id, record[26], time, record[31])
                }
            };

            let timestamp = match decode_time(raw_time) {
                Ok(ts) => ts,
                Err(_) => {
                    warn!(uid, raw_time, "skipping attendance row with undecodable timestamp");
                    continue;
                }
            };

            rows.push(Self {
                uid,
                user_id,
                status,
                punch,
                timestamp,
            });
        }

        Ok(rows)
    }
}
