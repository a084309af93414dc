//! Record layouts and parsers for the biometric terminal protocol
//!
//! Everything in this crate is plain data plus its wire form: user
//! records in both firmware layouts, fingerprint templates, attendance
//! rows in their three observed widths, capacity counters and realtime
//! events.

pub mod attendance;
pub mod capacity;
pub mod device_info;
pub mod error;
pub mod event;
pub mod template;
pub mod user;

pub use attendance::Attendance;
pub use capacity::Capacity;
pub use device_info::DeviceInfo;
pub use error::{Error, Result};
pub use event::RealtimeEvent;
pub use template::Template;
pub use user::{Privilege, User, UserLayout};
