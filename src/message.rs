//! Published message: a reading plus capture metadata.

use crate::decoder::Reading;
use crate::mac_address::MacAddress;
use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;

/// A decoded reading with the metadata attached at capture time.
///
/// Serializes to the flat JSON object consumers subscribe to:
/// `time`, `timestamp`, `RSSI`, `name`, `address`, then the reading fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Capture time as `YYYY-MM-DD HH:MM:SS` in the host offset
    pub time: String,
    /// Capture time in Unix seconds
    pub timestamp: i64,
    #[serde(rename = "RSSI")]
    pub rssi: i16,
    pub name: String,
    pub address: MacAddress,
    #[serde(flatten)]
    pub reading: Reading,
}

impl Message {
    pub fn new(
        reading: Reading,
        name: &str,
        address: MacAddress,
        rssi: i16,
        captured_at: OffsetDateTime,
    ) -> Self {
        Self {
            time: format_time(captured_at),
            timestamp: captured_at.unix_timestamp(),
            rssi,
            name: name.to_string(),
            address,
            reading,
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn format_time(at: OffsetDateTime) -> String {
    // Only fails for years outside 0..=9999
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    at.format(format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
