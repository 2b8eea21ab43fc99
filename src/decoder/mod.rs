//! Frame decoders for the supported sensor vendors.
//!
//! Each vendor has a fixed binary layout. [`DeviceKind`] is the closed set of
//! vendors; [`decode`] is the registry entry point that resolves a configured
//! type tag and runs the matching decoder.

pub mod atc;
pub mod inode;

use crate::advertisement::ServiceData;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Normalized physical readings produced by a successful decode.
///
/// Serializes with the field names downstream consumers expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Temperature in °C
    #[serde(rename = "T")]
    pub temperature: f64,
    /// Relative humidity in %RH
    #[serde(rename = "H")]
    pub humidity: f64,
    /// Barometric pressure in hPa, zero for vendors that do not report it
    #[serde(rename = "P")]
    pub pressure: f64,
    /// Battery level in percent (0-100)
    #[serde(rename = "battLvl")]
    pub battery_level: u16,
    /// Battery voltage in volts
    #[serde(rename = "battVolt")]
    pub battery_voltage: f64,
    /// Vendor-specific counter. ATC: rolling measurement count. iNode: uptime-derived.
    #[serde(rename = "count")]
    pub counter: u32,
}

/// Reasons a frame could not be turned into a [`Reading`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The payload this vendor needs is absent.
    #[error("{vendor}: no frame data in advertisement")]
    MissingData { vendor: DeviceKind },
    /// The payload is shorter than the fixed layout.
    #[error("{vendor}: frame truncated ({len} bytes, need {expected})")]
    TruncatedFrame {
        vendor: DeviceKind,
        len: usize,
        expected: usize,
    },
    /// None of the vendor's known identifiers is present.
    #[error("{vendor}: device data not found")]
    FrameNotFound { vendor: DeviceKind },
    /// A recognized layout that is not decoded.
    #[error("{vendor}: unsupported format: {reason}")]
    UnsupportedFormat {
        vendor: DeviceKind,
        reason: String,
    },
    /// The configured type tag names no known vendor.
    #[error("unsupported device type '{0}'")]
    UnsupportedDeviceType(String),
}

/// Supported sensor vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Xiaomi thermometers running the ATC custom firmware (service data 0x181A).
    Atc,
    /// iNode Care sensors (manufacturer data).
    Inode,
}

impl DeviceKind {
    /// The configuration tag for this vendor.
    pub fn tag(self) -> &'static str {
        match self {
            DeviceKind::Atc => "ATC",
            DeviceKind::Inode => "inode",
        }
    }

    /// Whether readings from this vendor carry a pressure value.
    pub fn reports_pressure(self) -> bool {
        matches!(self, DeviceKind::Inode)
    }

    /// Decode one advertisement's payloads with this vendor's layout.
    pub fn decode(
        self,
        manufacturer_data: &[u8],
        service_data: &[ServiceData],
    ) -> Result<Reading, DecodeError> {
        match self {
            DeviceKind::Atc => atc::decode(service_data),
            DeviceKind::Inode => inode::decode(manufacturer_data),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DeviceKind {
    type Err = DecodeError;

    /// Tags match exactly; `"atc"` is not `"ATC"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATC" => Ok(DeviceKind::Atc),
            "inode" => Ok(DeviceKind::Inode),
            other => Err(DecodeError::UnsupportedDeviceType(other.to_string())),
        }
    }
}

/// Little-endian `u16` at `offset`. Callers check the frame length first.
fn le_u16(frame: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([frame[offset], frame[offset + 1]])
}

/// Resolve `tag` and decode the payloads with that vendor's layout.
pub fn decode(
    tag: &str,
    manufacturer_data: &[u8],
    service_data: &[ServiceData],
) -> Result<Reading, DecodeError> {
    tag.parse::<DeviceKind>()?
        .decode(manufacturer_data, service_data)
}
