//! User enumeration and CRUD

use std::collections::HashSet;

use bytes::{BufMut, BytesMut};
use tracing::{debug, info, warn};

use bioterm_core::constants::data_types::FCT_USER;
use bioterm_core::Command;
use bioterm_types::{Privilege, User, UserLayout};

use crate::device::Device;
use crate::error::{Error, Result};

impl Device {
    /// Enumerate every user record on the device.
    ///
    /// The first enumeration also settles which record layout the
    /// firmware speaks (the total byte count divided by the advertised
    /// user count) and advances the free-uid/user-id hints past whatever
    /// is already taken.
    pub async fn get_users(&mut self) -> Result<Vec<User>> {
        self.ensure_connected()?;

        let capacity = self.capacity().await?;
        let data = self
            .read_with_buffer(Command::UserTempRrq, FCT_USER, 0)
            .await?;

        if data.len() <= 4 {
            self.next_uid = 1;
            self.next_user_id = "1".to_string();
            return Ok(Vec::new());
        }

        // Leading u32 is the total byte count of the record area
        let total = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let records = &data[4..];

        let layout = self.resolve_layout(total, records.len(), capacity.users)?;
        if layout != self.layout {
            debug!(?layout, "user record layout corrected");
            self.layout = layout;
        }

        let users = User::parse_all(records, layout)?;
        info!("Enumerated {} users", users.len());

        self.advance_hints(&users);
        Ok(users)
    }

    fn resolve_layout(
        &self,
        total: usize,
        available: usize,
        user_count: i32,
    ) -> Result<UserLayout> {
        if user_count > 0 && total % user_count as usize == 0 {
            if let Some(layout) = UserLayout::from_record_size(total / user_count as usize) {
                return Ok(layout);
            }
        }

        // Counter out of step with the table; fall back to divisibility
        let current = self.layout;
        [current, UserLayout::Wide, UserLayout::Narrow]
            .into_iter()
            .find(|layout| available > 0 && available % layout.record_size() == 0)
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "cannot determine user record width ({available} bytes, {user_count} users)"
                ))
            })
    }

    fn advance_hints(&mut self, users: &[User]) {
        let max_uid = users.iter().map(|u| u.uid).max().unwrap_or(0);
        self.next_uid = max_uid.saturating_add(1);

        let taken: HashSet<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        let mut candidate = self.next_uid as u32;
        while taken.contains(candidate.to_string().as_str()) {
            candidate += 1;
        }
        self.next_user_id = candidate.to_string();

        debug!(
            next_uid = self.next_uid,
            next_user_id = %self.next_user_id,
            "free-slot hints"
        );
    }

    /// Create or overwrite a user record.
    ///
    /// A zero `uid` allocates the next free record index; an empty
    /// `user_id` takes the next free identifier. Returns the uid the
    /// record went to.
    pub async fn set_user(&mut self, mut user: User) -> Result<u16> {
        self.ensure_connected()?;

        if user.uid == 0 {
            user.uid = self.next_uid;
        }
        if user.user_id.is_empty() {
            user.user_id = self.next_user_id.clone();
        }
        if user.privilege != Privilege::DEFAULT && !user.privilege.is_admin() {
            return Err(Error::Operation(format!(
                "unsupported privilege value {}",
                user.privilege.0
            )));
        }
        if self.layout == UserLayout::Narrow && user.user_id.parse::<u32>().is_err() {
            return Err(Error::Operation(format!(
                "this firmware only stores numeric user ids, got {:?}",
                user.user_id
            )));
        }

        debug!(uid = user.uid, user_id = %user.user_id, "writing user");

        let payload = user.pack(self.layout);
        self.exec_ok(Command::UserWrq, payload.freeze()).await?;
        self.refresh_data().await?;

        if user.uid == self.next_uid {
            self.next_uid = self.next_uid.saturating_add(1);
            self.next_user_id = (self.next_uid as u32).to_string();
        }

        Ok(user.uid)
    }

    /// Delete the user at a device-local record index
    pub async fn delete_user(&mut self, uid: u16) -> Result<()> {
        self.ensure_connected()?;

        let mut payload = BytesMut::with_capacity(2);
        payload.put_i16_le(uid as i16);
        self.exec_ok(Command::DeleteUser, payload.freeze()).await?;
        self.refresh_data().await?;

        info!(uid, "user deleted");
        Ok(())
    }

    /// Delete a user by application-level identifier.
    ///
    /// Enumerates the user table to resolve the record index first.
    pub async fn delete_user_by_id(&mut self, user_id: &str) -> Result<()> {
        let users = self.get_users().await?;
        let uid = users
            .iter()
            .find(|u| u.user_id == user_id)
            .map(|u| u.uid)
            .ok_or_else(|| {
                warn!(user_id, "delete requested for unknown user");
                Error::Operation(format!("user {user_id:?} not found"))
            })?;

        self.delete_user(uid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{sent_packets, MockTransport};
    use bioterm_core::Packet;
    use bioterm_types::Privilege;
    use pretty_assertions::assert_eq;

    fn capacity_block(users: i32, records: i32) -> Vec<u8> {
        let mut payload = vec![0u8; 80];
        payload[16..20].copy_from_slice(&users.to_le_bytes());
        payload[32..36].copy_from_slice(&records.to_le_bytes());
        payload
    }

    fn narrow_record(uid: u16, name: &str, user_id_num: u32) -> Vec<u8> {
        let mut record = vec![0u8; 28];
        record[0..2].copy_from_slice(&uid.to_le_bytes());
        record[8..8 + name.len()].copy_from_slice(name.as_bytes());
        record[24..28].copy_from_slice(&user_id_num.to_le_bytes());
        record
    }

    fn user_table(records: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = records.concat();
        let mut data = Vec::with_capacity(4 + body.len());
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&body);
        data
    }

    /// Queue connect + capacity + a user enumeration answering `table`
    fn mock_with_users(table: Vec<u8>, users: i32) -> MockTransport {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::with_payload(
            Command::AckOk,
            1,
            0,
            capacity_block(users, 0),
        ));
        mock.push_reply(Packet::with_payload(Command::Data, 1, 0, table));
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // free-data
        mock
    }

    #[tokio::test]
    async fn test_get_users_narrow_layout() {
        let table = user_table(&[narrow_record(1, "Alice", 1001)]);
        let mock = mock_with_users(table, 1);

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let users = device.get_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].uid, 1);
        assert_eq!(users[0].name, "Alice");
        assert_eq!(users[0].user_id, "1001");

        // The stream carrier starts wide; the enumeration corrects it
        assert_eq!(device.user_layout(), UserLayout::Narrow);
        assert_eq!(device.next_uid, 2);
        assert_eq!(device.next_user_id, "2");
    }

    #[tokio::test]
    async fn test_get_users_skips_taken_user_ids() {
        let table = user_table(&[
            narrow_record(1, "Alice", 1001),
            narrow_record(4, "Bob", 5), // collides with next_uid 5
        ]);
        let mock = mock_with_users(table, 2);

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        device.get_users().await.unwrap();
        assert_eq!(device.next_uid, 5);
        assert_eq!(device.next_user_id, "6");
    }

    #[tokio::test]
    async fn test_get_users_empty_table() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::with_payload(
            Command::AckOk,
            1,
            0,
            capacity_block(0, 0),
        ));
        mock.push_reply(Packet::with_payload(Command::Data, 1, 0, vec![0u8; 4]));
        mock.push_reply(Packet::new(Command::AckOk, 1, 0));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        assert!(device.get_users().await.unwrap().is_empty());
        assert_eq!(device.next_uid, 1);
    }

    #[tokio::test]
    async fn test_set_user_allocates_and_advances() {
        let mut mock = MockTransport::new(false); // datagram: narrow writes
        let log = mock.sent_log();
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // user write
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // refresh

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let uid = device
            .set_user(User {
                name: "Alice".into(),
                privilege: Privilege::DEFAULT,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(uid, 1);
        assert_eq!(device.next_uid, 2);

        let sent = sent_packets(&log);
        assert_eq!(sent[1].command, Command::UserWrq);
        assert_eq!(sent[1].payload.len(), 28);
        assert_eq!(sent[2].command, Command::RefreshData);
    }

    #[tokio::test]
    async fn test_set_user_rejects_bad_privilege() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let result = device
            .set_user(User {
                privilege: Privilege(6),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(Error::Operation(_))));
    }

    #[tokio::test]
    async fn test_delete_user_by_id_not_found() {
        let table = user_table(&[narrow_record(1, "Alice", 1001)]);
        let mock = mock_with_users(table, 1);

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let result = device.delete_user_by_id("nope").await;
        assert!(matches!(result, Err(Error::Operation(_))));
    }

    #[tokio::test]
    async fn test_delete_user_sends_uid() {
        let mut mock = MockTransport::new(true);
        let log = mock.sent_log();
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // delete
        mock.push_reply(Packet::new(Command::AckOk, 1, 0)); // refresh

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        device.delete_user(7).await.unwrap();

        let sent = sent_packets(&log);
        assert_eq!(sent[1].command, Command::DeleteUser);
        assert_eq!(sent[1].payload.as_ref(), &[7, 0]);
    }
}
