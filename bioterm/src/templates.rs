//! Fingerprint template transfer
//!
//! Reads go through the staging buffer (whole-table dump) or the direct
//! per-finger command. The bulk save packs three regions — user records,
//! a finger index table, length-prefixed templates — behind a 12-byte
//! region header and pushes them through the upload path before
//! `CMD_SAVE_USERTEMPS` commits the lot.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info};

use bioterm_core::constants::data_types::FCT_FINGERTMP;
use bioterm_core::constants::MAX_RETRIES;
use bioterm_core::Command;
use bioterm_transport::Transport;
use bioterm_types::user::put_string;
use bioterm_types::{Template, User};

use crate::device::Device;
use crate::error::{Error, Result};

impl Device {
    /// Dump every fingerprint template on the device
    pub async fn get_templates(&mut self) -> Result<Vec<Template>> {
        self.ensure_connected()?;

        let data = self
            .read_with_buffer(Command::DbRrq, FCT_FINGERTMP, 0)
            .await?;

        if data.len() <= 4 {
            return Ok(Vec::new());
        }

        let total = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let body = &data[4..];
        let usable = total.min(body.len());

        let templates = Template::parse_dump(&body[..usable])?;
        info!("Dumped {} templates", templates.len());
        Ok(templates)
    }

    /// Read one template by (uid, finger index).
    ///
    /// Retried a few times; several firmware lines drop the first request
    /// after an enrollment.
    pub async fn get_user_template(&mut self, uid: u16, fid: u8) -> Result<Template> {
        self.ensure_connected()?;

        let mut req = BytesMut::with_capacity(3);
        req.put_i16_le(uid as i16);
        req.put_i8(fid as i8);
        let req = req.freeze();

        let mut last_err = None;
        for attempt in 1..=MAX_RETRIES {
            if attempt > 1 {
                debug!(attempt, uid, fid, "retrying template read");
            }

            match self.try_get_user_template(req.clone()).await {
                Ok(blob) if !blob.is_empty() => return Ok(Template::new(uid, fid, 1, blob)),
                Ok(_) => {
                    last_err = Some(Error::Operation(format!(
                        "no template stored for uid {uid}, finger {fid}"
                    )))
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.expect("at least one template attempt ran"))
    }

    async fn try_get_user_template(&mut self, req: Bytes) -> Result<Bytes> {
        let reply = self.exec(Command::GetUserTemp, req).await?;

        let data = match reply.command {
            Command::Data => reply.payload,
            Command::PrepareData => {
                if reply.payload.len() < 4 {
                    return Err(Error::Protocol("prepare-data without a size".into()));
                }
                let size = u32::from_le_bytes([
                    reply.payload[0],
                    reply.payload[1],
                    reply.payload[2],
                    reply.payload[3],
                ]) as usize;
                self.recv_prepared(size).await?
            }
            other => {
                return Err(Error::Protocol(format!(
                    "template read answered {}",
                    other
                )))
            }
        };

        Ok(trim_template(data))
    }

    /// Delete one enrolled finger.
    ///
    /// Newer firmware addresses the finger by user id string; the
    /// datagram fallback goes by record index.
    pub async fn delete_user_template(
        &mut self,
        uid: u16,
        user_id: &str,
        fid: u8,
    ) -> Result<()> {
        self.ensure_connected()?;

        if self.transport.is_stream() && !user_id.is_empty() {
            let mut req = BytesMut::with_capacity(25);
            put_string(&mut req, user_id, 24);
            req.put_u8(fid);
            self.exec_ok(Command::DelUserTemp, req.freeze()).await?;
        } else {
            let mut req = BytesMut::with_capacity(3);
            req.put_i16_le(uid as i16);
            req.put_i8(fid as i8);
            self.exec_ok(Command::DeleteUserTemp, req.freeze()).await?;
        }

        self.refresh_data().await?;
        info!(uid, fid, "template deleted");
        Ok(())
    }

    /// Write one user together with their fingerprints
    pub async fn save_user_template(
        &mut self,
        user: &User,
        fingers: &[Template],
    ) -> Result<()> {
        self.save_user_templates(&[(user.clone(), fingers.to_vec())])
            .await
    }

    /// Write a batch of users and their fingerprints in one transfer
    pub async fn save_user_templates(
        &mut self,
        entries: &[(User, Vec<Template>)],
    ) -> Result<()> {
        self.ensure_connected()?;

        let mut upack = BytesMut::new();
        let mut table = BytesMut::new();
        let mut fpack = BytesMut::new();

        for (user, fingers) in entries {
            upack.extend_from_slice(&user.repack(self.layout));

            for finger in fingers {
                // Index entry: tag, uid, 0x10+fid, offset into the
                // template region
                table.put_u8(0x02);
                table.put_u16_le(user.uid);
                table.put_u8(0x10 + finger.fid);
                table.put_u32_le(fpack.len() as u32);

                fpack.extend_from_slice(&finger.repack_only());
            }
        }

        let mut packet = BytesMut::with_capacity(12 + upack.len() + table.len() + fpack.len());
        packet.put_u32_le(upack.len() as u32);
        packet.put_u32_le(table.len() as u32);
        packet.put_u32_le(fpack.len() as u32);
        packet.extend_from_slice(&upack);
        packet.extend_from_slice(&table);
        packet.extend_from_slice(&fpack);

        debug!(
            users = entries.len(),
            bytes = packet.len(),
            "uploading user/template batch"
        );

        self.send_with_buffer(&packet).await?;

        let mut commit = BytesMut::with_capacity(8);
        commit.put_u32_le(packet.len() as u32);
        commit.put_u16_le(0);
        commit.put_u16_le(8);
        self.exec_ok(Command::SaveUserTemps, commit.freeze()).await?;

        self.refresh_data().await
    }
}

/// Drop the trailing terminator the direct template read appends (one
/// byte, plus a six-zero tail on some firmware).
fn trim_template(data: Bytes) -> Bytes {
    if data.is_empty() {
        return data;
    }

    let mut end = data.len() - 1;
    if end >= 6 && data[end - 6..end] == [0u8; 6] {
        end -= 6;
    }
    data.slice(..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{sent_packets, MockTransport};
    use bioterm_core::Packet;
    use pretty_assertions::assert_eq;

    fn dump_entry(uid: u16, fid: u8, blob: &[u8]) -> Vec<u8> {
        let mut entry = Vec::new();
        entry.extend_from_slice(&(6 + blob.len() as u16).to_le_bytes());
        entry.extend_from_slice(&uid.to_le_bytes());
        entry.push(fid);
        entry.push(1);
        entry.extend_from_slice(blob);
        entry
    }

    #[test]
    fn test_trim_template_tail() {
        let data = Bytes::from_static(&[1, 2, 3, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(trim_template(data).as_ref(), &[1, 2, 3]);

        let data = Bytes::from_static(&[1, 2, 3, 0]);
        assert_eq!(trim_template(data).as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_get_templates() {
        let mut body = dump_entry(1, 0, b"left thumb");
        body.extend(dump_entry(1, 1, b"left index"));

        let mut table = Vec::new();
        table.extend_from_slice(&(body.len() as u32).to_le_bytes());
        table.extend_from_slice(&body);

        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::with_payload(Command::Data, 1, 0, table));
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // free-data

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let templates = device.get_templates().await.unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].blob.as_ref(), b"left thumb");
        assert_eq!(templates[1].fid, 1);
    }

    #[tokio::test]
    async fn test_get_user_template_retries_then_succeeds() {
        let mut blob = b"whorls and ridges".to_vec();
        blob.push(0); // terminator byte the device appends

        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::new(Command::AckError, 1, 0)); // first try fails
        mock.push_reply(Packet::with_payload(Command::Data, 1, 0, blob));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let template = device.get_user_template(3, 1).await.unwrap();
        assert_eq!(template.uid, 3);
        assert_eq!(template.blob.as_ref(), b"whorls and ridges");
    }

    #[tokio::test]
    async fn test_save_user_templates_region_layout() {
        let mut mock = MockTransport::new(false); // narrow save form
        let log = mock.sent_log();
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        for _ in 0..5 {
            // free, prepare, data, commit, refresh
            mock.push_reply(Packet::new(Command::AckOk, 1, 0));
        }

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let user = User {
            uid: 3,
            user_id: "1003".into(),
            name: "Alice".into(),
            ..Default::default()
        };
        let fingers = vec![
            Template::new(3, 0, 1, b"aaaa".as_slice()),
            Template::new(3, 1, 1, b"bbbbbb".as_slice()),
        ];

        device.save_user_template(&user, &fingers).await.unwrap();

        let sent = sent_packets(&log);
        // CONNECT, FREE, PREPARE, DATA, SAVE, REFRESH
        assert_eq!(sent[2].command, Command::PrepareData);
        assert_eq!(sent[3].command, Command::Data);
        assert_eq!(sent[4].command, Command::SaveUserTemps);
        assert_eq!(sent[5].command, Command::RefreshData);

        let body = sent[3].payload.as_ref();
        let users_len = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let table_len = u32::from_le_bytes(body[4..8].try_into().unwrap()) as usize;
        let fps_len = u32::from_le_bytes(body[8..12].try_into().unwrap()) as usize;

        assert_eq!(users_len, 29); // one narrow save record
        assert_eq!(table_len, 16); // two 8-byte index entries
        assert_eq!(fps_len, 4 + 2 + 6 + 2); // blobs plus length prefixes
        assert_eq!(body.len(), 12 + users_len + table_len + fps_len);

        // First index entry: tag, uid, 0x10+fid, offset 0
        let table = &body[12 + users_len..12 + users_len + table_len];
        assert_eq!(table[0], 0x02);
        assert_eq!(u16::from_le_bytes(table[1..3].try_into().unwrap()), 3);
        assert_eq!(table[3], 0x10);
        assert_eq!(u32::from_le_bytes(table[4..8].try_into().unwrap()), 0);
        // Second entry starts where the first packed template ended
        assert_eq!(table[11], 0x11);
        assert_eq!(u32::from_le_bytes(table[12..16].try_into().unwrap()), 6);

        // Commit argument: total length, 0, 8
        let commit = sent[4].payload.as_ref();
        assert_eq!(
            u32::from_le_bytes(commit[0..4].try_into().unwrap()) as usize,
            body.len()
        );
        assert_eq!(u16::from_le_bytes(commit[4..6].try_into().unwrap()), 0);
        assert_eq!(u16::from_le_bytes(commit[6..8].try_into().unwrap()), 8);
    }
}
