//! Fingerprint templates
//!
//! Templates are opaque blobs keyed by (uid, finger index). The device
//! dumps them as a stream of entries with a 6-byte header; uploads use a
//! bare u16 length prefix instead.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A fingerprint template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Device-local user record index
    pub uid: u16,

    /// Finger index, 0-9
    pub fid: u8,

    /// Non-zero when the template is usable
    pub valid: u8,

    /// Opaque enrollment blob
    pub blob: Bytes,
}

impl Template {
    pub fn new(uid: u16, fid: u8, valid: u8, blob: impl Into<Bytes>) -> Self {
        Self {
            uid,
            fid,
            valid,
            blob: blob.into(),
        }
    }

    /// Total size of this template in the dump format (6-byte header + blob)
    pub fn dump_size(&self) -> usize {
        6 + self.blob.len()
    }

    /// Parse a template dump: entries of
    /// `[size:u16 (incl. header), uid:u16, fid:u8, valid:u8]` + blob.
    pub fn parse_dump(data: &[u8]) -> Result<Vec<Self>> {
        let mut templates = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            if rest.len() < 6 {
                return Err(Error::Parse(format!(
                    "dangling {} bytes after last template entry",
                    rest.len()
                )));
            }

            let size = u16::from_le_bytes([rest[0], rest[1]]) as usize;
            let uid = u16::from_le_bytes([rest[2], rest[3]]);
            let fid = rest[4];
            let valid = rest[5];

            if size < 6 || size > rest.len() {
                return Err(Error::Parse(format!(
                    "template entry claims {size} bytes, {} available",
                    rest.len()
                )));
            }

            templates.push(Self::new(uid, fid, valid, rest[6..size].to_vec()));
            rest = &rest[size..];
        }

        Ok(templates)
    }

    /// Pack for upload: a u16 length prefix (blob length + 2, counting the
    /// prefix itself) followed by the blob.
    pub fn repack_only(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(2 + self.blob.len());
        buf.put_u16_le(self.blob.len() as u16 + 2);
        buf.put_slice(&self.blob);
        buf
    }
}
