//! Raw advertisement events as delivered by the scanner backends.

use crate::mac_address::MacAddress;

/// One 16-bit service-data entry from an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceData {
    /// 16-bit service UUID, already decoded from its little-endian wire form.
    pub uuid: u16,
    /// Payload following the UUID.
    pub data: Vec<u8>,
}

impl ServiceData {
    pub fn new(uuid: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            uuid,
            data: data.into(),
        }
    }
}

/// A single observed beacon.
///
/// `manufacturer_data` keeps the leading two-byte company identifier, since
/// some frame layouts count their offsets from it. Both payload fields may be
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawAdvertisement {
    pub address: MacAddress,
    /// Received signal strength in dBm.
    pub rssi: i16,
    pub manufacturer_data: Vec<u8>,
    pub service_data: Vec<ServiceData>,
}
