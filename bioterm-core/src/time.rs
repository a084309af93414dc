//! Device timestamp codec
//!
//! The terminals store a timestamp as a u32 counting from 2000-01-01 on a
//! fixed calendar where every month has 31 days:
//!
//! ```text
//! ((((Y * 12 + (M - 1)) * 31 + (D - 1)) * 24 + h) * 60 + m) * 60 + s
//! ```
//!
//! with `Y` = years since 2000. The calendar is not proleptic; a raw value
//! may decode to a day that does not exist (e.g. February 31) and must not
//! be normalized away. Such values are reported as errors, with the raw
//! tuple available through [`decode_time_parts`].

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Error, Result};

/// Encode a timestamp into the device's u32 representation
///
/// # Examples
///
/// ```
/// use bioterm_core::time;
/// use chrono::NaiveDate;
///
/// let dt = NaiveDate::from_ymd_opt(2000, 1, 1)
///     .unwrap()
///     .and_hms_opt(0, 0, 0)
///     .unwrap();
/// assert_eq!(time::encode_time(&dt), 0);
/// ```
pub fn encode_time(dt: &NaiveDateTime) -> u32 {
    let year = (dt.year() - 2000) as u32;

    let days = (year * 12 + (dt.month() - 1)) * 31 + (dt.day() - 1);
    let minutes = (days * 24 + dt.hour()) * 60 + dt.minute();
    minutes * 60 + dt.second()
}

/// Decode a raw device timestamp into its calendar tuple
/// `(year, month, day, hour, minute, second)`
///
/// Performs no validation; garbage in the device's log storage surfaces
/// here as impossible tuples.
pub fn decode_time_parts(raw: u32) -> (i32, u32, u32, u32, u32, u32) {
    let mut t = raw;

    let second = t % 60;
    t /= 60;
    let minute = t % 60;
    t /= 60;
    let hour = t % 24;
    t /= 24;
    let day = t % 31 + 1;
    t /= 31;
    let month = t % 12 + 1;
    t /= 12;
    let year = t as i32 + 2000;

    (year, month, day, hour, minute, second)
}

/// Decode a raw device timestamp
///
/// # Errors
///
/// Returns [`Error::InvalidTime`] when the raw value names a day that does
/// not exist in the real calendar (the device's 31-day months make such
/// values representable).
pub fn decode_time(raw: u32) -> Result<NaiveDateTime> {
    let (year, month, day, hour, minute, second) = decode_time_parts(raw);

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or(Error::InvalidTime(raw))
}

/// Decode the 6-byte packed timestamp carried by realtime events:
/// `[Y-2000, M, D, h, m, s]`
pub fn decode_compact_time(raw: &[u8; 6]) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2000 + raw[0] as i32, raw[1] as u32, raw[2] as u32)
        .and_then(|d| d.and_hms_opt(raw[3] as u32, raw[4] as u32, raw[5] as u32))
        .ok_or(Error::InvalidTime(u32::from_le_bytes([
            raw[0], raw[1], raw[2], raw[3],
        ])))
}
