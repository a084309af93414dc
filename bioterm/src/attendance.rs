//! Attendance log transfer

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, info};

use bioterm_core::Command;
use bioterm_types::Attendance;

use crate::device::Device;
use crate::error::{Error, Result};

impl Device {
    /// Pull the whole attendance log.
    ///
    /// The record width is the payload size divided by the advertised
    /// record count; rows in the narrow shape only carry a record index,
    /// so the user table is enumerated first to resolve identifiers.
    pub async fn get_attendance(&mut self) -> Result<Vec<Attendance>> {
        self.ensure_connected()?;

        let users = self.get_users().await?;
        let record_hint = self.capacity().await?.records;

        let data = self.read_with_buffer(Command::AttLogRrq, 0, 0).await?;
        if data.len() <= 4 {
            return Ok(Vec::new());
        }

        let body = data.slice(4..);
        let record_size = resolve_record_size(&body, record_hint)?;
        debug!(record_size, bytes = body.len(), "attendance table");

        let mut rows = Attendance::parse_all(&body, record_size)?;

        if record_size == 8 {
            let by_uid: HashMap<u16, &str> =
                users.iter().map(|u| (u.uid, u.user_id.as_str())).collect();
            for row in &mut rows {
                if let Some(id) = by_uid.get(&row.uid) {
                    row.user_id = id.to_string();
                }
            }
        }

        info!("Fetched {} attendance rows", rows.len());
        Ok(rows)
    }

    /// Erase the attendance log
    pub async fn clear_attendance(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.exec_ok(Command::ClearAttLog, Bytes::new()).await?;
        self.refresh_data().await?;
        info!("Attendance log cleared");
        Ok(())
    }

    /// Dump a raw table through the staging buffer; `fct` selects it
    pub async fn read_database(&mut self, fct: i32, ext: i32) -> Result<Bytes> {
        self.ensure_connected()?;
        self.read_with_buffer(Command::DbRrq, fct, ext).await
    }
}

/// Derive the row width from the advertised count, falling back to the
/// widths seen in the wild when the counter is out of step.
fn resolve_record_size(body: &[u8], record_hint: i32) -> Result<usize> {
    if record_hint > 0 && body.len() % record_hint as usize == 0 {
        return Ok(body.len() / record_hint as usize);
    }

    [40usize, 16, 8]
        .into_iter()
        .find(|size| body.len() % size == 0)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "cannot determine attendance record width ({} bytes, {} records)",
                body.len(),
                record_hint
            ))
        })
}
