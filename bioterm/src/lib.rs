//! # bioterm
//!
//! Async client for the binary protocol spoken by a family of networked
//! biometric attendance and access-control terminals (time clocks with
//! fingerprint, card, face and PIN authentication).
//!
//! ## Features
//!
//! - TCP and UDP carriers behind one connection API
//! - Session handshake with optional commkey authentication
//! - User, fingerprint-template and attendance-log transfer
//! - Live punch stream and fingerprint enrollment
//! - Device control: time, relay, LCD, voice, restart, power off
//!
//! ## Quick Start
//!
//! ```no_run
//! use bioterm::Device;
//!
//! #[tokio::main]
//! async fn main() -> bioterm::Result<()> {
//!     // Connect to device
//!     let mut device = Device::new("192.168.1.201", 4370);
//!     device.connect().await?;
//!
//!     // Pull the attendance log
//!     for row in device.get_attendance().await? {
//!         println!("{} punched at {}", row.user_id, row.timestamp);
//!     }
//!
//!     device.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod attendance;
pub mod device;
pub mod enroll;
pub mod error;
pub mod live;
pub mod options;
pub mod templates;
pub mod transfer;
pub mod users;

#[cfg(test)]
pub(crate) mod mock;

// Re-exports
pub use device::Device;
pub use enroll::Enrollment;
pub use error::{Error, Result};
pub use live::{LiveCapture, LiveTick, StopHandle};

// Re-export the pieces host programs touch directly
pub use bioterm_core::{constants, Command, Packet, Session};
pub use bioterm_types::{
    Attendance, Capacity, DeviceInfo, Privilege, RealtimeEvent, Template, User, UserLayout,
};
