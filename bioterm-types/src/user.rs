//! User records and their two wire layouts
//!
//! Older firmware stores users in 28-byte records; newer firmware on the
//! stream carrier uses 72-byte records with free-form user id strings.
//! Which one a device speaks is discovered from the first enumeration
//! (total byte count divided by the advertised user count).
//!
//! Field offsets, narrow layout:
//!
//! ```text
//! uid 0:2  privilege 2:1  password 3:5  name 8:8  card 16:4
//! (reserved 20:1)  group 21:1  (reserved 22:2)  user-id-number 24:4
//! ```
//!
//! Wide layout:
//!
//! ```text
//! uid 0:2  privilege 2:1  password 3:8  name 11:24  card 35:4
//! (reserved 39:1)  group 40:7  (reserved 47:1)  user-id 48:24
//! ```
//!
//! The save forms (29/73 bytes) prepend a 0x02 tag byte and shift every
//! field by one.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use bioterm_core::constants::privileges::{USER_ADMIN, USER_DEFAULT};

use crate::error::{Error, Result};

/// Privilege byte: bit 0 disables the user, bits 1-3 select the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege(pub u8);

impl Privilege {
    pub const DEFAULT: Privilege = Privilege(USER_DEFAULT);
    pub const ADMIN: Privilege = Privilege(USER_ADMIN);

    /// Bit 0: the user exists but cannot punch
    pub fn is_disabled(self) -> bool {
        self.0 & 1 != 0
    }

    /// Role bits with the disabled flag masked off
    pub fn role(self) -> u8 {
        self.0 & !1
    }

    pub fn is_admin(self) -> bool {
        self.role() == USER_ADMIN
    }
}

impl Default for Privilege {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Wire layout of a user record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLayout {
    /// 28-byte records, numeric user ids (older firmware)
    Narrow,
    /// 72-byte records, 24-byte user id strings (newer firmware)
    Wide,
}

impl UserLayout {
    pub const fn record_size(self) -> usize {
        match self {
            Self::Narrow => 28,
            Self::Wide => 72,
        }
    }

    /// Pick the layout whose record size matches an enumeration, if any.
    pub fn from_record_size(size: usize) -> Option<Self> {
        match size {
            28 => Some(Self::Narrow),
            72 => Some(Self::Wide),
            _ => None,
        }
    }
}

/// A user record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Device-local record index
    pub uid: u16,

    /// Application-level identifier; numeric on the narrow layout
    pub user_id: String,

    pub name: String,

    pub privilege: Privilege,

    pub password: String,

    /// Small integer on the narrow layout, up to 7 characters on the wide
    pub group_id: String,

    pub card: u32,
}

impl User {
    /// Parse one narrow (28-byte) record
    pub fn parse_narrow(record: &[u8]) -> Result<Self> {
        if record.len() < 28 {
            return Err(Error::Parse(format!(
                "narrow user record needs 28 bytes, got {}",
                record.len()
            )));
        }

        let uid = u16::from_le_bytes([record[0], record[1]]);
        let privilege = Privilege(record[2]);
        let password = string_field(&record[3..8]);
        let name = string_field(&record[8..16]);
        let card = u32::from_le_bytes([record[16], record[17], record[18], record[19]]);
        let group_id = record[21].to_string();
        let user_id_num = u32::from_le_bytes([record[24], record[25], record[26], record[27]]);

        Ok(Self {
            uid,
            user_id: user_id_num.to_string(),
            name,
            privilege,
            password,
            group_id,
            card,
        })
    }

    /// Parse one wide (72-byte) record
    pub fn parse_wide(record: &[u8]) -> Result<Self> {
        if record.len() < 72 {
            return Err(Error::Parse(format!(
                "wide user record needs 72 bytes, got {}",
                record.len()
            )));
        }

        let uid = u16::from_le_bytes([record[0], record[1]]);
        let privilege = Privilege(record[2]);
        let password = string_field(&record[3..11]);
        let name = string_field(&record[11..35]);
        let card = u32::from_le_bytes([record[35], record[36], record[37], record[38]]);
        let group_id = string_field(&record[40..47]);
        let user_id = string_field(&record[48..72]);

        Ok(Self {
            uid,
            user_id,
            name,
            privilege,
            password,
            group_id,
            card,
        })
    }

    /// Parse a whole enumeration buffer of fixed-width records
    pub fn parse_all(data: &[u8], layout: UserLayout) -> Result<Vec<Self>> {
        let size = layout.record_size();
        let mut users = Vec::with_capacity(data.len() / size);

        for record in data.chunks_exact(size) {
            users.push(match layout {
                UserLayout::Narrow => Self::parse_narrow(record)?,
                UserLayout::Wide => Self::parse_wide(record)?,
            });
        }

        Ok(users)
    }

    /// Pack into the 28-byte write form
    ///
    /// The group id occupies byte 21 only; bytes 22-23 stay zero.
    pub fn pack_narrow(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(28);

        buf.put_u16_le(self.uid);
        buf.put_u8(self.privilege.0);
        put_string(&mut buf, &self.password, 5);
        put_string(&mut buf, &self.name, 8);
        buf.put_u32_le(self.card);
        buf.put_u8(0); // reserved
        buf.put_u8(self.group_id.parse().unwrap_or(0));
        buf.put_u16_le(0);
        buf.put_u32_le(self.user_id.parse().unwrap_or(0));

        buf
    }

    /// Pack into the 72-byte write form
    pub fn pack_wide(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(72);

        buf.put_u16_le(self.uid);
        buf.put_u8(self.privilege.0);
        put_string(&mut buf, &self.password, 8);
        put_string(&mut buf, &self.name, 24);
        buf.put_u32_le(self.card);
        buf.put_u8(0); // reserved
        put_string(&mut buf, &self.group_id, 7);
        buf.put_u8(0); // reserved
        put_string(&mut buf, &self.user_id, 24);

        buf
    }

    /// Pack for the given layout
    pub fn pack(&self, layout: UserLayout) -> BytesMut {
        match layout {
            UserLayout::Narrow => self.pack_narrow(),
            UserLayout::Wide => self.pack_wide(),
        }
    }

    /// Pack into the 29-byte save form (0x02 tag, fields shifted by one)
    pub fn repack_narrow(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(29);
        buf.put_u8(0x02);
        buf.extend_from_slice(&self.pack_narrow());
        buf
    }

    /// Pack into the 73-byte save form (0x02 tag, fields shifted by one)
    pub fn repack_wide(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(73);
        buf.put_u8(0x02);
        buf.extend_from_slice(&self.pack_wide());
        buf
    }

    /// Save form for the given layout
    pub fn repack(&self, layout: UserLayout) -> BytesMut {
        match layout {
            UserLayout::Narrow => self.repack_narrow(),
            UserLayout::Wide => self.repack_wide(),
        }
    }
}

/// Extract a NUL-padded UTF-8 string field
pub(crate) fn string_field(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

/// Write a UTF-8 string NUL-padded and right-truncated to `width`
pub fn put_string(buf: &mut BytesMut, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(width);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, width - n);
}
