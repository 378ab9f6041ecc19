use std::fmt::Display;

#[cfg(feature = "limesuite")]
use crate::{
    Error,
    LimeSdr,
    driver::limesuite::LimeSuite,
};

/// Returns the LimeSDR devices the driver can see.
#[cfg(feature = "limesuite")]
pub fn devices() -> Result<Vec<DeviceInfo>, Error> {
    crate::driver::limesuite::device_list()
}

/// LimeSDR device descriptor, as returned by [`devices`].
///
/// LimeSuite identifies devices by a string like
/// `LimeSDR Mini, media=USB 3.0, module=FT601, addr=24607:1027, serial=1D3AC..`.
/// We keep that string around, because it's what we need to pass back to open
/// the device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub media: String,
    pub module: String,
    pub addr: String,
    pub serial: String,
    info_string: String,
}

impl DeviceInfo {
    /// Parse a LimeSuite device info string.
    pub fn parse(info: &str) -> Self {
        let info = clean_string(info);
        let mut device_info = DeviceInfo {
            info_string: info.to_owned(),
            ..Default::default()
        };

        for part in info.split(',') {
            match part.split_once('=') {
                None => device_info.name = clean_string(part).to_owned(),
                Some((key, value)) => {
                    let value = clean_string(value).to_owned();
                    match key.trim().to_ascii_lowercase().as_str() {
                        "media" => device_info.media = value,
                        "module" => device_info.module = value,
                        "addr" => device_info.addr = value,
                        "serial" => device_info.serial = value,
                        _ => {}
                    }
                }
            }
        }

        device_info
    }

    /// The raw string the driver used to describe the device.
    pub fn info_string(&self) -> &str {
        &self.info_string
    }

    /// Open the device
    #[cfg(feature = "limesuite")]
    pub fn open(&self) -> Result<LimeSdr<LimeSuite>, Error> {
        LimeSdr::new(LimeSuite::open(self)?)
    }
}

impl Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.name, self.media)
    }
}

/// Version information reported by an open device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HardwareInfo {
    pub device_name: String,
    pub expansion_name: String,
    pub firmware_version: String,
    pub hardware_version: String,
    pub protocol_version: String,
    pub board_serial_number: u64,
    pub gateware_version: String,
    pub gateware_target_board: String,
}

/// Strips the NUL padding and whitespace the driver leaves around its strings.
pub(crate) fn clean_string(s: &str) -> &str {
    s.trim_matches(|c: char| c == '\0' || c == ' ')
}

/// Reads a NUL-terminated (or full-length) string out of a fixed size buffer.
#[cfg_attr(not(feature = "limesuite"), allow(dead_code))]
pub(crate) fn string_from_bytes(bytes: &[u8]) -> String {
    let length = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    clean_string(&String::from_utf8_lossy(&bytes[..length])).to_owned()
}
