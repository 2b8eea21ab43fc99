use crate::decoder::Reading;
use crate::mac_address::MacAddress;
use crate::message::Message;
use crate::sink::Sink;
use std::sync::Mutex;
use time::macros::datetime;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// ATC custom-format service data body (UUID 0x181A), captured from a real sensor.
///
/// 23.08 °C, 34.67 %RH, 2984 mV, 87 %, count 23.
pub const ATC_FRAME: [u8; 15] = [
    27, 50, 60, 56, 193, 164, 4, 9, 139, 13, 168, 11, 87, 23, 4,
];

/// iNode Care manufacturer data including the leading company id bytes.
pub const INODE_FRAME: [u8; 24] = [
    16, 157, 1, 160, 8, 4, 232, 62, 158, 18, 61, 42, 21, 0, 250, 221, 164, 97, 151, 156, 40, 148,
    51, 248,
];

/// A reading with plausible values and the given temperature.
pub fn reading(temperature: f64) -> Reading {
    Reading {
        temperature,
        humidity: 40.0,
        pressure: 0.0,
        battery_level: 90,
        battery_voltage: 2.9,
        counter: 0,
    }
}

/// A message for `mac` whose counter identifies it in assertions.
pub fn message(mac: MacAddress, name: &str, counter: u32) -> Message {
    let reading = Reading {
        counter,
        ..reading(21.0)
    };
    Message::new(reading, name, mac, -60, datetime!(2024-03-09 07:05:03 UTC))
}

/// Sink that records every publish in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

impl Sink for RecordingSink {
    fn publish(&self, topic: &str, payload: &str) {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
    }
}
