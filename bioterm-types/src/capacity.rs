//! Device capacity counters
//!
//! `CMD_GET_FREE_SIZES` answers with at least 20 little-endian i32 values;
//! newer face-capable firmware appends face counters after byte 80.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage counters reported by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub users: i32,
    pub fingers: i32,
    pub records: i32,
    pub dummy: i32,
    pub cards: i32,
    pub fingers_cap: i32,
    pub users_cap: i32,
    pub records_cap: i32,
    pub fingers_avail: i32,
    pub users_avail: i32,
    pub records_avail: i32,

    /// Enrolled faces, when the firmware reports them
    pub faces: Option<i32>,
    pub faces_cap: Option<i32>,
}

impl Capacity {
    /// Parse a `CMD_GET_FREE_SIZES` reply payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 80 {
            return Err(Error::Parse(format!(
                "capacity block needs 80 bytes, got {}",
                payload.len()
            )));
        }

        let field = |idx: usize| -> i32 {
            let off = idx * 4;
            i32::from_le_bytes([
                payload[off],
                payload[off + 1],
                payload[off + 2],
                payload[off + 3],
            ])
        };

        let mut capacity = Self {
            users: field(4),
            fingers: field(6),
            records: field(8),
            dummy: field(10),
            cards: field(12),
            fingers_cap: field(14),
            users_cap: field(15),
            records_cap: field(16),
            fingers_avail: field(17),
            users_avail: field(18),
            records_avail: field(19),
            faces: None,
            faces_cap: None,
        };

        if payload.len() >= 92 {
            capacity.faces = Some(field(20));
            capacity.faces_cap = Some(field(22));
        }

        Ok(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn block(fields: &[(usize, i32)], len: usize) -> Vec<u8> {
        let mut payload = vec![0u8; len];
        for &(idx, value) in fields {
            payload[idx * 4..idx * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        payload
    }

    #[test]
    fn test_parse_80_byte_block() {
        let payload = block(
            &[(4, 12), (6, 30), (8, 1500), (12, 5), (15, 3000), (16, 100_000), (19, 98_500)],
            80,
        );

        let capacity = Capacity::parse(&payload).unwrap();
        assert_eq!(capacity.users, 12);
        assert_eq!(capacity.fingers, 30);
        assert_eq!(capacity.records, 1500);
        assert_eq!(capacity.cards, 5);
        assert_eq!(capacity.users_cap, 3000);
        assert_eq!(capacity.records_cap, 100_000);
        assert_eq!(capacity.records_avail, 98_500);
        assert_eq!(capacity.faces, None);
    }

    #[test]
    fn test_parse_face_counters() {
        let payload = block(&[(4, 1), (20, 8), (22, 500)], 92);

        let capacity = Capacity::parse(&payload).unwrap();
        assert_eq!(capacity.faces, Some(8));
        assert_eq!(capacity.faces_cap, Some(500));
    }

    #[test]
    fn test_parse_short_block_rejected() {
        assert!(Capacity::parse(&[0u8; 40]).is_err());
    }
}
