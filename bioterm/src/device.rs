//! High-level device interface: session lifecycle and control commands

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::NaiveDateTime;
use tracing::{debug, info, trace, warn};

use bioterm_core::constants::{DEFAULT_TIMEOUT, USHRT_MAX};
use bioterm_core::time::{decode_time, encode_time};
use bioterm_core::{make_commkey, Command, Packet, Session};
use bioterm_transport::{TcpTransport, Transport, UdpTransport};
use bioterm_types::{Capacity, UserLayout};

use crate::error::{Error, Result};

/// Ticks byte fed into the commkey derivation
const COMMKEY_TICKS: u8 = 50;

/// A biometric terminal
///
/// High-level interface for one device session. All commands are strictly
/// serial: the rolling reply identifier makes interleaving unsafe, so the
/// device handle requires `&mut self` throughout.
///
/// # Examples
///
/// ```no_run
/// use bioterm::Device;
///
/// #[tokio::main]
/// async fn main() -> bioterm::Result<()> {
///     let mut device = Device::new("192.168.1.201", 4370);
///
///     device.connect().await?;
///     println!("firmware: {}", device.get_firmware_version().await?);
///
///     device.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct Device {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) session: Session,
    pub(crate) timeout: Duration,
    addr: String,
    password: u32,

    /// Mirrors the device enable/disable state
    pub(crate) enabled: bool,

    /// User record layout; optimistic until the first enumeration
    pub(crate) layout: UserLayout,

    /// Capacity counters cached from the last CMD_GET_FREE_SIZES
    pub(crate) capacity: Option<Capacity>,

    /// Next free device-local record index
    pub(crate) next_uid: u16,

    /// Next free application-level user id
    pub(crate) next_user_id: String,
}

impl Device {
    /// Create a device handle on the stream (TCP) carrier
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        let addr = ip.into();
        Self::with_transport(addr.clone(), Box::new(TcpTransport::new(addr, port)))
    }

    /// Create a device handle on the datagram (UDP) carrier
    ///
    /// The older terminals only answer on UDP.
    pub fn new_udp(ip: impl Into<String>, port: u16) -> Self {
        let addr = ip.into();
        Self::with_transport(addr.clone(), Box::new(UdpTransport::new(addr, port)))
    }

    /// Create a device handle over an arbitrary carrier
    pub fn with_transport(addr: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        let layout = if transport.is_stream() {
            UserLayout::Wide
        } else {
            UserLayout::Narrow
        };

        Self {
            transport,
            session: Session::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT),
            addr: addr.into(),
            password: 0,
            enabled: true,
            layout,
            capacity: None,
            next_uid: 1,
            next_user_id: "1".to_string(),
        }
    }

    /// Set the per-operation receive deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the communication password (default: 0)
    pub fn with_password(mut self, password: u32) -> Self {
        self.password = password;
        self
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.session.is_connected() && self.transport.is_connected()
    }

    /// Session identifier assigned by the device, 0 before connect
    pub fn session_id(&self) -> u16 {
        self.session.session_id()
    }

    /// User record layout currently assumed for writes
    pub fn user_layout(&self) -> UserLayout {
        self.layout
    }

    /// Connect and perform the handshake
    ///
    /// Adopts the session id the device assigns in its reply. Devices
    /// with a communication password answer `CMD_ACK_UNAUTH`; the derived
    /// commkey is then presented through `CMD_AUTH`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the address is empty, [`Error::Auth`] when
    /// the device keeps refusing the commkey, [`Error::Protocol`] on any
    /// other non-ok reply.
    pub async fn connect(&mut self) -> Result<()> {
        if self.addr.trim().is_empty() {
            return Err(Error::Config("device address is empty".to_string()));
        }

        info!("Connecting to {}...", self.transport.remote_addr());

        self.transport.connect().await?;

        // The connect command goes out before any session id exists
        let packet = Packet::new(Command::Connect, 0, self.session.next_reply_id());
        self.transport.send_frame(&packet.encode()).await?;

        let reply = self.recv_raw_packet().await?;
        self.session.sync_reply(reply.reply_id);
        let session_id = reply.session_id;

        match reply.command {
            Command::AckOk => {
                self.session.initialize(session_id)?;
                info!("Connected (session_id=0x{:04X})", session_id);
            }
            Command::AckUnauth => {
                info!("Device requires authentication");
                if let Err(e) = self.authenticate(session_id).await {
                    let _ = self.transport.disconnect().await;
                    return Err(e);
                }
            }
            other => {
                let _ = self.transport.disconnect().await;
                return Err(Error::Protocol(format!("connect answered {}", other)));
            }
        }

        // Per-connection caches start over
        self.enabled = true;
        self.capacity = None;
        self.layout = if self.transport.is_stream() {
            UserLayout::Wide
        } else {
            UserLayout::Narrow
        };
        self.next_uid = 1;
        self.next_user_id = "1".to_string();

        Ok(())
    }

    async fn authenticate(&mut self, session_id: u16) -> Result<()> {
        let key = make_commkey(self.password, session_id, COMMKEY_TICKS);
        debug!("Auth key: {:02X?} (session_id=0x{:04X})", key, session_id);

        let packet = Packet::with_payload(
            Command::Auth,
            session_id,
            self.session.next_reply_id(),
            key,
        );
        self.transport.send_frame(&packet.encode()).await?;

        let reply = self.recv_raw_packet().await?;
        self.session.sync_reply(reply.reply_id);
        match reply.command {
            Command::AckOk => {
                self.session.initialize(reply.session_id)?;
                self.session.authenticate()?;
                info!("Authenticated (session_id=0x{:04X})", reply.session_id);
                Ok(())
            }
            Command::AckUnauth => Err(Error::Auth(
                "device rejected the communication password".to_string(),
            )),
            other => Err(Error::Protocol(format!(
                "authentication answered {}",
                other
            ))),
        }
    }

    /// Disconnect from the device
    ///
    /// The closing `CMD_EXIT` is best-effort: whatever the device answers,
    /// the socket is released and the session forgotten.
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        info!("Disconnecting from {}...", self.transport.remote_addr());

        let packet = Packet::new(
            Command::Exit,
            self.session.session_id(),
            self.session.next_reply_id(),
        );
        match self.transport.send_frame(&packet.encode()).await {
            Ok(()) => {
                let _ = self.transport.recv_frame(self.timeout).await;
            }
            Err(e) => warn!("Failed to send EXIT command: {}", e),
        }

        self.transport.disconnect().await?;
        self.session.close();
        self.capacity = None;
        self.next_uid = 1;
        self.next_user_id = "1".to_string();

        info!("Disconnected");
        Ok(())
    }

    // Request/reply plumbing

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Send one command and return the (session-checked) reply
    pub(crate) async fn exec(
        &mut self,
        command: Command,
        payload: impl Into<Bytes>,
    ) -> Result<Packet> {
        self.ensure_connected()?;

        let packet = Packet::with_payload(
            command,
            self.session.session_id(),
            self.session.next_reply_id(),
            payload,
        );
        trace!("Sending: {:?}", packet);
        self.transport.send_frame(&packet.encode()).await?;

        self.recv_reply().await
    }

    /// Like [`Self::exec`], but any non-ok reply becomes a protocol error
    pub(crate) async fn exec_ok(
        &mut self,
        command: Command,
        payload: impl Into<Bytes>,
    ) -> Result<Packet> {
        let reply = self.exec(command, payload).await?;
        if !reply.is_ok() {
            return Err(Error::Protocol(format!(
                "{} answered {}",
                command, reply.command
            )));
        }
        Ok(reply)
    }

    /// Receive and validate the next reply frame
    pub(crate) async fn recv_reply(&mut self) -> Result<Packet> {
        let reply = self.recv_raw_packet().await?;

        // The device echoes the session id it assigned at connect; a
        // different value means the session was lost underneath us.
        if self.session.is_connected() && reply.session_id != self.session.session_id() {
            return Err(Error::Protocol(format!(
                "session reassigned: 0x{:04X} -> 0x{:04X}",
                self.session.session_id(),
                reply.session_id
            )));
        }

        self.session.sync_reply(reply.reply_id);
        Ok(reply)
    }

    async fn recv_raw_packet(&mut self) -> Result<Packet> {
        let buf = self.transport.recv_frame(self.timeout).await?;
        let reply = Packet::decode(buf)?;
        trace!("Received: {:?}", reply);
        Ok(reply)
    }

    /// Raw frame receive with its own deadline; used by the realtime
    /// flows to drain frames the device pushes unsolicited.
    pub(crate) async fn recv_raw(
        &mut self,
        deadline: Duration,
    ) -> bioterm_transport::Result<BytesMut> {
        self.transport.recv_frame(deadline).await
    }

    /// Acknowledge an unsolicited frame (fixed reply id 65534)
    pub(crate) async fn ack_ok(&mut self) -> Result<()> {
        let packet = Packet::new(Command::AckOk, self.session.session_id(), USHRT_MAX - 1);
        self.transport.send_frame(&packet.encode()).await?;
        Ok(())
    }

    // Capacity

    /// Read and cache the capacity counters
    pub async fn read_sizes(&mut self) -> Result<Capacity> {
        debug!("Reading capacity counters");

        let reply = self.exec_ok(Command::GetFreeSizes, Bytes::new()).await?;
        let capacity = Capacity::parse(&reply.payload)?;

        debug!(
            users = capacity.users,
            fingers = capacity.fingers,
            records = capacity.records,
            "Capacity"
        );

        self.capacity = Some(capacity);
        Ok(capacity)
    }

    /// Cached capacity counters, reading them on first use
    pub(crate) async fn capacity(&mut self) -> Result<Capacity> {
        match self.capacity {
            Some(capacity) => Ok(capacity),
            None => self.read_sizes().await,
        }
    }

    // Thin control wrappers

    /// Enable the device (normal operation mode)
    pub async fn enable_device(&mut self) -> Result<()> {
        self.exec_ok(Command::EnableDevice, Bytes::new()).await?;
        self.enabled = true;
        Ok(())
    }

    /// Disable the device (shows "Working..." on the LCD)
    pub async fn disable_device(&mut self) -> Result<()> {
        self.exec_ok(Command::DisableDevice, Bytes::new()).await?;
        self.enabled = false;
        Ok(())
    }

    /// Restart the device; the session ends with it
    pub async fn restart(&mut self) -> Result<()> {
        self.ensure_connected()?;
        warn!("Restarting device");

        // The link may drop before the reply makes it out
        let _ = self.exec(Command::Restart, Bytes::new()).await;

        self.transport.disconnect().await?;
        self.session.close();
        Ok(())
    }

    /// Power the device off; the session ends with it
    pub async fn power_off(&mut self) -> Result<()> {
        self.ensure_connected()?;
        warn!("Powering off device");

        let _ = self.exec(Command::PowerOff, Bytes::new()).await;

        self.transport.disconnect().await?;
        self.session.close();
        Ok(())
    }

    /// Play one of the built-in voice prompts
    pub async fn test_voice(&mut self, index: u32) -> Result<()> {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32_le(index);
        self.exec_ok(Command::TestVoice, payload.freeze()).await?;
        Ok(())
    }

    /// Commit pending data changes on the device
    pub async fn refresh_data(&mut self) -> Result<()> {
        self.exec_ok(Command::RefreshData, Bytes::new()).await?;
        Ok(())
    }

    /// Read the device clock
    pub async fn get_time(&mut self) -> Result<NaiveDateTime> {
        let reply = self.exec_ok(Command::GetTime, Bytes::new()).await?;

        if reply.payload.len() < 4 {
            return Err(Error::Protocol("time reply shorter than 4 bytes".into()));
        }
        let raw = u32::from_le_bytes([
            reply.payload[0],
            reply.payload[1],
            reply.payload[2],
            reply.payload[3],
        ]);
        Ok(decode_time(raw)?)
    }

    /// Set the device clock
    pub async fn set_time(&mut self, when: &NaiveDateTime) -> Result<()> {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32_le(encode_time(when));
        self.exec_ok(Command::SetTime, payload.freeze()).await?;
        Ok(())
    }

    /// Pulse the lock relay open for the given duration (decisecond
    /// resolution)
    pub async fn unlock(&mut self, duration: Duration) -> Result<()> {
        let deciseconds = (duration.as_millis() / 100) as u32;
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32_le(deciseconds);
        self.exec_ok(Command::Unlock, payload.freeze()).await?;
        Ok(())
    }

    /// Read the door sensor state byte
    pub async fn door_state(&mut self) -> Result<u8> {
        let reply = self.exec_ok(Command::DoorStateRrq, Bytes::new()).await?;
        reply
            .payload
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol("empty door-state reply".into()))
    }

    /// Write a line of text to the LCD
    pub async fn write_lcd(&mut self, line: i16, text: &str) -> Result<()> {
        let mut payload = BytesMut::with_capacity(4 + text.len());
        payload.put_i16_le(line);
        payload.put_u8(0);
        payload.put_u8(b' ');
        payload.put_slice(text.as_bytes());
        self.exec_ok(Command::WriteLcd, payload.freeze()).await?;
        Ok(())
    }

    /// Restore the LCD to its idle display
    pub async fn clear_lcd(&mut self) -> Result<()> {
        self.exec_ok(Command::ClearLcd, Bytes::new()).await?;
        Ok(())
    }

    /// Firmware version string
    pub async fn get_firmware_version(&mut self) -> Result<String> {
        let reply = self.exec_ok(Command::GetVersion, Bytes::new()).await?;
        Ok(String::from_utf8_lossy(&reply.payload)
            .trim_end_matches('\0')
            .to_string())
    }

    /// Maximum user-id digit width accepted by this firmware
    pub async fn get_pin_width(&mut self) -> Result<u8> {
        let reply = self
            .exec_ok(Command::GetPinWidth, Bytes::from_static(b" P"))
            .await?;
        reply
            .payload
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol("empty pin-width reply".into()))
    }

    /// Erase all user, template and attendance data
    pub async fn clear_data(&mut self) -> Result<()> {
        warn!("Clearing all device data");
        self.exec_ok(Command::ClearData, Bytes::new()).await?;
        self.capacity = None;
        self.next_uid = 1;
        self.next_user_id = "1".to_string();
        Ok(())
    }

    /// Put the device into verification mode
    pub async fn start_verify(&mut self) -> Result<()> {
        self.exec_ok(Command::StartVerify, Bytes::new()).await?;
        Ok(())
    }

    /// Abort any capture or enrollment in progress
    pub async fn cancel_capture(&mut self) -> Result<()> {
        self.exec_ok(Command::CancelCapture, Bytes::new()).await?;
        Ok(())
    }

    /// (De)register realtime event delivery; 0 deregisters everything
    pub(crate) async fn reg_event(&mut self, flags: u32) -> Result<()> {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32_le(flags);
        self.exec_ok(Command::RegEvent, payload.freeze()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn test_device_create() {
        let device = Device::new("192.168.1.201", 4370);
        assert!(!device.is_connected());
        assert_eq!(device.user_layout(), UserLayout::Wide);

        let device = Device::new_udp("192.168.1.201", 4370);
        assert_eq!(device.user_layout(), UserLayout::Narrow);
    }

    #[tokio::test]
    async fn test_connect_empty_address_is_config_error() {
        let mut device = Device::new("", 4370);
        let result = device.connect().await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_adopts_session() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 0x1234, 65534));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        assert!(device.is_connected());
        assert_eq!(device.session_id(), 0x1234);
    }

    #[tokio::test]
    async fn test_connect_authenticates_on_unauth() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckUnauth, 0x0BEE, 65534));
        mock.push_reply(Packet::new(Command::AckOk, 0x0BEE, 0));

        let mut device =
            Device::with_transport("10.0.0.9", Box::new(mock)).with_password(1234);
        device.connect().await.unwrap();

        assert!(device.is_connected());
        assert!(device.session.is_authenticated());
        assert_eq!(device.session_id(), 0x0BEE);
    }

    #[tokio::test]
    async fn test_connect_auth_rejected() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckUnauth, 7, 65534));
        mock.push_reply(Packet::new(Command::AckUnauth, 7, 0));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        let result = device.connect().await;

        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_non_ok_reply_is_protocol_error() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::new(Command::AckError, 1, 0));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let result = device.refresh_data().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_session_reassignment_detected() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::new(Command::AckOk, 2, 0));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let result = device.refresh_data().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_sizes_caches_capacity() {
        let mut payload = vec![0u8; 80];
        payload[16..20].copy_from_slice(&7i32.to_le_bytes()); // users at index 4
        payload[32..36].copy_from_slice(&900i32.to_le_bytes()); // records at index 8

        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::with_payload(Command::AckOk, 1, 0, payload));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        let capacity = device.read_sizes().await.unwrap();
        assert_eq!(capacity.users, 7);
        assert_eq!(capacity.records, 900);
        assert_eq!(device.capacity, Some(capacity));
    }

    #[tokio::test]
    async fn test_get_time() {
        use chrono::NaiveDate;

        let when = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(10, 30, 45)
            .unwrap();

        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        mock.push_reply(Packet::with_payload(
            Command::AckOk,
            1,
            0,
            encode_time(&when).to_le_bytes().to_vec(),
        ));

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        assert_eq!(device.get_time().await.unwrap(), when);
    }

    #[tokio::test]
    async fn test_disconnect_swallows_exit_failure() {
        let mut mock = MockTransport::new(true);
        mock.push_reply(Packet::new(Command::AckOk, 1, 65534));
        // no reply queued for EXIT: the recv times out, disconnect succeeds

        let mut device = Device::with_transport("10.0.0.9", Box::new(mock));
        device.connect().await.unwrap();

        device.disconnect().await.unwrap();
        assert!(!device.is_connected());
    }
}
