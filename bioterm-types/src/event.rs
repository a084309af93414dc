//! Realtime event records
//!
//! Once `CMD_REG_EVENT` registers an event mask, the device pushes
//! unsolicited `CMD_REG_EVENT` frames whose payload carries one or more
//! punch records. The record shape is inferred from the remaining payload
//! length: 10 bytes carry a u16 user id, 12 bytes a u32 user id, 32 or
//! more a 24-byte user id string. The trailing 6 bytes of each record are
//! the packed timestamp `[Y-2000, M, D, h, m, s]`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use bioterm_core::time::decode_compact_time;

use crate::user::string_field;

/// A punch pushed by the device while event registration is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Device-local record index when the narrow shape carried one
    pub uid: Option<u16>,

    /// Application-level user identifier (numeric on the narrow shapes)
    pub user_id: String,

    pub status: u8,

    pub punch: u8,

    /// None when the packed timestamp does not decode
    pub timestamp: Option<NaiveDateTime>,
}

impl RealtimeEvent {
    /// Parse every record in a `CMD_REG_EVENT` payload.
    ///
    /// Unrecognized trailing bytes are ignored; the devices pad some
    /// firmware revisions' frames.
    pub fn parse_all(payload: &[u8]) -> Vec<Self> {
        let mut events = Vec::new();
        let mut rest = payload;

        while rest.len() >= 10 {
            let (event, consumed) = match rest.len() {
                12 => (Self::parse_wide(rest), 12),
                n if n >= 32 => (Self::parse_string(rest), 32),
                // exactly 10, or a run of 10-byte records
                _ => (Self::parse_narrow(rest), 10),
            };
            events.push(event);
            rest = &rest[consumed..];
        }

        events
    }

    fn parse_narrow(data: &[u8]) -> Self {
        let uid = u16::from_le_bytes([data[0], data[1]]);
        Self {
            uid: Some(uid),
            user_id: uid.to_string(),
            status: data[2],
            punch: data[3],
            timestamp: decode_compact_time(&compact(&data[4..10])).ok(),
        }
    }

    fn parse_wide(data: &[u8]) -> Self {
        let user_id = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        Self {
            uid: None,
            user_id: user_id.to_string(),
            status: data[4],
            punch: data[5],
            timestamp: decode_compact_time(&compact(&data[6..12])).ok(),
        }
    }

    fn parse_string(data: &[u8]) -> Self {
        Self {
            uid: None,
            user_id: string_field(&data[0..24]),
            status: data[24],
            punch: data[25],
            timestamp: decode_compact_time(&compact(&data[26..32])).ok(),
        }
    }
}

fn compact(slice: &[u8]) -> [u8; 6] {
    let mut raw = [0u8; 6];
    raw.copy_from_slice(slice);
    raw
}
