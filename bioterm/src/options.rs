//! Option registry access and the identity reads built on it
//!
//! The terminals expose a string key/value registry: `CMD_OPTIONS_RRQ`
//! with `Name\0` answers `Name=Value\0`, `CMD_OPTIONS_WRQ` takes
//! `Name=Value\0`. Most identity and feature probes are thin reads of
//! well-known keys.

use bytes::{BufMut, BytesMut};
use tracing::debug;

use bioterm_core::Command;
use bioterm_types::DeviceInfo;

use crate::device::Device;
use crate::error::Result;

impl Device {
    /// Read one option registry value
    pub async fn get_option(&mut self, name: &str) -> Result<String> {
        let mut req = BytesMut::with_capacity(name.len() + 1);
        req.put_slice(name.as_bytes());
        req.put_u8(0);

        let reply = self.exec_ok(Command::OptionsRrq, req.freeze()).await?;

        let text = String::from_utf8_lossy(&reply.payload);
        let text = text.trim_end_matches('\0');
        let value = text
            .split_once('=')
            .map(|(_, value)| value)
            .unwrap_or(text)
            .to_string();

        debug!(name, value = %value, "option read");
        Ok(value)
    }

    /// Write one option registry value
    pub async fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        let mut req = BytesMut::with_capacity(name.len() + value.len() + 2);
        req.put_slice(name.as_bytes());
        req.put_u8(b'=');
        req.put_slice(value.as_bytes());
        req.put_u8(0);

        self.exec_ok(Command::OptionsWrq, req.freeze()).await?;
        debug!(name, value, "option written");
        Ok(())
    }

    /// Device serial number
    pub async fn get_serial_number(&mut self) -> Result<String> {
        self.get_option("~SerialNumber").await
    }

    /// Hardware platform name
    pub async fn get_platform(&mut self) -> Result<String> {
        self.get_option("~Platform").await
    }

    /// MAC address
    pub async fn get_mac(&mut self) -> Result<String> {
        self.get_option("MAC").await
    }

    /// User-assigned device name
    pub async fn get_device_name(&mut self) -> Result<String> {
        self.get_option("~DeviceName").await
    }

    /// Fingerprint algorithm version
    pub async fn get_fp_version(&mut self) -> Result<String> {
        self.get_option("~ZKFPVersion").await
    }

    /// Face algorithm version (empty on face-less hardware)
    pub async fn get_face_version(&mut self) -> Result<String> {
        self.get_option("ZKFaceVersion").await
    }

    /// Extended attendance record format flag
    pub async fn get_extend_fmt(&mut self) -> Result<String> {
        self.get_option("~ExtendFmt").await
    }

    /// Extended user record format flag
    pub async fn get_user_extend_fmt(&mut self) -> Result<String> {
        self.get_option("~UserExtFmt").await
    }

    /// Whether face identification is switched on
    pub async fn get_face_fun_on(&mut self) -> Result<String> {
        self.get_option("FaceFunOn").await
    }

    /// Old-firmware compatibility flag
    pub async fn get_compat_old_firmware(&mut self) -> Result<String> {
        self.get_option("CompatOldFirmware").await
    }

    /// IP address, netmask and gateway as configured on the device
    pub async fn get_network_params(&mut self) -> Result<(String, String, String)> {
        let ip = self.get_option("IPAddress").await?;
        let mask = self.get_option("NetMask").await?;
        let gateway = self.get_option("GATEIPAddress").await?;
        Ok((ip, mask, gateway))
    }

    /// Announce SDK-style host behaviour to the firmware
    pub async fn set_sdk_build(&mut self) -> Result<()> {
        self.set_option("SDKBuild", "1").await
    }

    /// Aggregate the common identity reads
    pub async fn get_device_info(&mut self) -> Result<DeviceInfo> {
        let serial_number = self.get_serial_number().await?;
        let firmware_version = self.get_firmware_version().await?;
        let platform = self.get_platform().await?;
        let device_name = self.get_device_name().await?;
        let mac_address = self.get_mac().await?;

        Ok(DeviceInfo {
            serial_number,
            firmware_version,
            platform: (!platform.is_empty()).then_some(platform),
            device_name: (!device_name.is_empty()).then_some(device_name),
            mac_address: (!mac_address.is_empty()).then_some(mac_address),
        })
    }
}
