//! Session state tracking
//!
//! A session represents a connection to a device and tracks:
//! - Session ID (assigned by device in the connect reply, echoed on every
//!   frame afterwards)
//! - Rolling reply counter (one new value per outbound packet, modulo
//!   65535, re-synchronized from every reply header)
//! - Authentication state

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use crate::constants::USHRT_MAX;
use crate::error::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected
    Disconnected,

    /// Connected, no communication password required
    Connected,

    /// Connected through the authentication handshake
    Authenticated,
}

/// Session manager
///
/// Manages session identity and reply ID generation.
/// Thread-safe and can be cloned cheaply (Arc internally).
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    /// Session ID assigned by device (0 when not connected)
    session_id: AtomicU16,

    /// Next reply id to put on the wire
    next_reply: AtomicU16,

    /// Last reply id sent or echoed
    last_reply: AtomicU16,

    /// Current session state
    state: parking_lot::RwLock<SessionState>,
}

impl Session {
    /// Reply id carried by the first packet of a session
    pub const INITIAL_REPLY_ID: u16 = USHRT_MAX - 1;

    /// Create a new disconnected session
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                session_id: AtomicU16::new(0),
                next_reply: AtomicU16::new(Self::INITIAL_REPLY_ID),
                last_reply: AtomicU16::new(Self::INITIAL_REPLY_ID),
                state: parking_lot::RwLock::new(SessionState::Disconnected),
            }),
        }
    }

    /// Get current session ID
    pub fn session_id(&self) -> u16 {
        self.inner.session_id.load(Ordering::Acquire)
    }

    /// Get the last reply id sent or echoed
    pub fn reply_id(&self) -> u16 {
        self.inner.last_reply.load(Ordering::Acquire)
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        !matches!(self.state(), SessionState::Disconnected)
    }

    /// Check if the authentication handshake completed
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), SessionState::Authenticated)
    }

    /// Initialize session with the device-assigned session ID
    pub fn initialize(&self, session_id: u16) -> Result<()> {
        let mut state = self.inner.state.write();

        if *state != SessionState::Disconnected {
            return Err(Error::InvalidSessionState(format!(
                "Cannot initialize from state: {:?}",
                *state
            )));
        }

        self.inner.session_id.store(session_id, Ordering::Release);
        *state = SessionState::Connected;

        Ok(())
    }

    /// Mark session as authenticated
    pub fn authenticate(&self) -> Result<()> {
        let mut state = self.inner.state.write();

        if *state != SessionState::Connected {
            return Err(Error::InvalidSessionState(format!(
                "Cannot authenticate from state: {:?}",
                *state
            )));
        }

        *state = SessionState::Authenticated;
        Ok(())
    }

    /// Close session
    pub fn close(&self) {
        self.inner.session_id.store(0, Ordering::Release);
        self.inner
            .next_reply
            .store(Self::INITIAL_REPLY_ID, Ordering::Release);
        self.inner
            .last_reply
            .store(Self::INITIAL_REPLY_ID, Ordering::Release);
        *self.inner.state.write() = SessionState::Disconnected;
    }

    /// Take the reply ID for the next outbound packet
    ///
    /// The counter advances `(r + 1) % 65535` per packet; 65535 itself
    /// never appears on the wire.
    pub fn next_reply_id(&self) -> u16 {
        let id = self
            .inner
            .next_reply
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.wrapping_add(1) % USHRT_MAX)
            })
            .expect("reply counter update never fails");
        self.inner.last_reply.store(id, Ordering::Release);
        id
    }

    /// Re-synchronize the counter from a reply header
    ///
    /// The device echoes the reply id of the packet it is answering; the
    /// next outbound packet continues one past the echoed value.
    pub fn sync_reply(&self, echoed: u16) {
        self.inner.last_reply.store(echoed, Ordering::Release);
        self.inner
            .next_reply
            .store(echoed.wrapping_add(1) % USHRT_MAX, Ordering::Release);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert_eq!(session.session_id(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_session_initialize() {
        let session = Session::new();
        session.initialize(1234).unwrap();

        assert_eq!(session.session_id(), 1234);
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_connected());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_session_authenticate() {
        let session = Session::new();
        session.initialize(1234).unwrap();
        session.authenticate().unwrap();

        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_session_close() {
        let session = Session::new();
        session.initialize(1234).unwrap();
        session.authenticate().unwrap();

        session.close();

        assert_eq!(session.session_id(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_reply_id_sequence_and_wrap() {
        let session = Session::new();
        session.initialize(100).unwrap();

        // First packet carries 65534, then the counter wraps to 0: the
        // modulus is 65535, so that value never reaches the wire.
        assert_eq!(session.next_reply_id(), 65534);
        assert_eq!(session.next_reply_id(), 0);
        assert_eq!(session.next_reply_id(), 1);
    }

    #[test]
    fn test_reply_id_never_hits_modulus() {
        let session = Session::new();
        session.initialize(100).unwrap();

        for _ in 0..70000 {
            assert_ne!(session.next_reply_id(), 65535);
        }
    }

    #[test]
    fn test_sync_reply_tracks_device() {
        let session = Session::new();
        session.initialize(100).unwrap();

        let sent = session.next_reply_id();
        assert_eq!(sent, 65534);

        // Device echoes what we sent; the client copy follows it
        session.sync_reply(sent);
        assert_eq!(session.reply_id(), 65534);
        assert_eq!(session.next_reply_id(), 0);

        session.sync_reply(0);
        assert_eq!(session.next_reply_id(), 1);
    }

    #[test]
    fn test_invalid_state_transitions() {
        let session = Session::new();

        // Cannot authenticate without connecting
        assert!(session.authenticate().is_err());

        // Cannot initialize twice
        session.initialize(100).unwrap();
        assert!(session.initialize(200).is_err());
    }

    #[test]
    fn test_session_clone() {
        let session1 = Session::new();
        session1.initialize(1234).unwrap();

        let session2 = session1.clone();

        // Both share same state
        assert_eq!(session2.session_id(), 1234);

        session1.authenticate().unwrap();
        assert!(session2.is_authenticated());
    }
}
