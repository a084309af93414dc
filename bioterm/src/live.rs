//! Live punch capture
//!
//! After event registration the device pushes `CMD_REG_EVENT` frames on
//! its own schedule, breaking the request/reply rhythm. The capture
//! session drains them with the raw receive primitive under a short
//! deadline, acknowledges every pushed frame, and yields an idle tick
//! whenever nothing arrived so the consumer can observe liveness.
//!
//! ```no_run
//! use bioterm::{Device, LiveTick};
//! use bioterm_core::constants::events::EF_ATTLOG;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> bioterm::Result<()> {
//! let mut device = Device::new("192.168.1.201", 4370);
//! device.connect().await?;
//!
//! let mut capture = device.live_capture(Duration::from_secs(10), EF_ATTLOG).await?;
//! let stop = capture.stop_handle();
//!
//! while let Some(tick) = capture.next().await? {
//!     match tick {
//!         LiveTick::Punch(event) => println!("{} punched", event.user_id),
//!         LiveTick::Idle => {} // deadline passed without an event
//!     }
//!     if false {
//!         stop.stop(); // observed at the top of the next iteration
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use bioterm_core::{Command, Packet};
use bioterm_types::RealtimeEvent;

use crate::device::Device;
use crate::error::Result;

/// One turn of the capture loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveTick {
    /// A punch pushed by the device
    Punch(RealtimeEvent),

    /// Nothing arrived before the poll deadline (or an undecodable/
    /// foreign frame was drained); the stream is still alive
    Idle,
}

/// Cooperative stop signal for a capture session
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the capture loop to wind down. Takes effect at the top of
    /// the next iteration, once any in-flight receive returns.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// An active live-capture session; ends via [`StopHandle::stop`] or
/// [`LiveCapture::stop`]
pub struct LiveCapture<'a> {
    device: &'a mut Device,
    users: HashMap<u16, String>,
    was_enabled: bool,
    poll_timeout: Duration,
    stop: Arc<AtomicBool>,
    pending: VecDeque<RealtimeEvent>,
    finished: bool,
}

impl Device {
    /// Start streaming punches.
    ///
    /// Enumerates users (to resolve record indexes to identifiers),
    /// resets any capture in progress, enables the device if it was
    /// disabled, and registers for the event classes in `flags`
    /// (`EF_ATTLOG` for punches, `EF_ALL` for everything).
    pub async fn live_capture(
        &mut self,
        poll_timeout: Duration,
        flags: u32,
    ) -> Result<LiveCapture<'_>> {
        self.ensure_connected()?;

        let users: HashMap<u16, String> = self
            .get_users()
            .await?
            .into_iter()
            .map(|u| (u.uid, u.user_id))
            .collect();

        self.cancel_capture().await?;
        self.start_verify().await?;

        let was_enabled = self.enabled;
        if !was_enabled {
            self.enable_device().await?;
        }

        self.reg_event(flags).await?;

        info!(flags = format!("0x{flags:08X}"), "live capture started");

        Ok(LiveCapture {
            device: self,
            users,
            was_enabled,
            poll_timeout,
            stop: Arc::new(AtomicBool::new(false)),
            pending: VecDeque::new(),
            finished: false,
        })
    }
}

impl LiveCapture<'_> {
    /// Clonable stop signal, observed at the top of each loop turn
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Wait for the next tick. Returns `None` once the session has been
    /// stopped and torn down.
    pub async fn next(&mut self) -> Result<Option<LiveTick>> {
        if self.finished {
            return Ok(None);
        }

        if self.stop.load(Ordering::SeqCst) {
            self.teardown().await?;
            return Ok(None);
        }

        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(LiveTick::Punch(event)));
        }

        let frame = match self.device.recv_raw(self.poll_timeout).await {
            Ok(frame) => frame,
            Err(e) if e.is_timeout() => return Ok(Some(LiveTick::Idle)),
            Err(e) => {
                // Transport hiccups surface as idle ticks; the consumer
                // decides when to give up
                warn!("live capture receive failed: {}", e);
                return Ok(Some(LiveTick::Idle));
            }
        };

        // Every pushed frame gets an ack with the fixed reply id
        if let Err(e) = self.device.ack_ok().await {
            warn!("failed to ack pushed frame: {}", e);
        }

        match self.decode_events(frame) {
            Some(events) => {
                self.pending.extend(events);
                match self.pending.pop_front() {
                    Some(event) => Ok(Some(LiveTick::Punch(event))),
                    None => Ok(Some(LiveTick::Idle)),
                }
            }
            None => Ok(Some(LiveTick::Idle)),
        }
    }

    fn decode_events(&self, frame: BytesMut) -> Option<Vec<RealtimeEvent>> {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("ignoring undecodable pushed frame: {}", e);
                return None;
            }
        };

        if packet.command != Command::RegEvent {
            debug!("ignoring pushed {} frame", packet.command);
            return None;
        }

        let mut events = RealtimeEvent::parse_all(&packet.payload);
        for event in &mut events {
            if let Some(id) = event.uid.and_then(|uid| self.users.get(&uid)) {
                event.user_id = id.clone();
            }
        }

        Some(events)
    }

    /// Stop immediately instead of via the handle
    pub async fn stop(mut self) -> Result<()> {
        if !self.finished {
            self.teardown().await?;
        }
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.finished = true;

        // Deregister events and put the device back the way it was
        self.device.reg_event(0).await?;
        if !self.was_enabled {
            self.device.disable_device().await?;
        }

        info!("live capture stopped");
        Ok(())
    }
}
