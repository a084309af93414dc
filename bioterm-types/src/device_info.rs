//! Device information structures

use serde::{Deserialize, Serialize};

/// Identity read from the option registry and version command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device serial number (`~SerialNumber`)
    pub serial_number: String,

    /// Firmware version string
    pub firmware_version: String,

    /// Platform name (`~Platform`)
    pub platform: Option<String>,

    /// Device name as shown on the terminal (`~DeviceName`)
    pub device_name: Option<String>,

    /// MAC address (`MAC`)
    pub mac_address: Option<String>,
}
