//! Decoder for the ATC custom thermometer firmware.
//!
//! The firmware advertises service data under the Environmental Sensing UUID.
//! The 15-byte "custom" layout:
//!
//! | bytes   | field                          |
//! |---------|--------------------------------|
//! | 0..6    | MAC, least significant first   |
//! | 6..8    | temperature, i16 LE, 0.01 °C   |
//! | 8..10   | humidity, u16 LE, 0.01 %       |
//! | 10..12  | battery, u16 LE, mV            |
//! | 12      | battery level, %               |
//! | 13      | measurement counter            |
//! | 14      | flags                          |
//!
//! The firmware can also send a 12-byte big-endian "ATC1441" layout on the
//! same UUID, or the stock Xiaomi frame on 0xFE95. Both are recognized and
//! rejected.

use super::{DecodeError, DeviceKind, Reading, le_u16};
use crate::advertisement::ServiceData;

/// Environmental Sensing service UUID carrying ATC frames.
pub const SERVICE_UUID: u16 = 0x181A;

/// Xiaomi native (MiBeacon) service UUID.
pub const XIAOMI_SERVICE_UUID: u16 = 0xFE95;

/// Length of the custom ATC layout.
pub const CUSTOM_FRAME_LEN: usize = 15;

const VENDOR: DeviceKind = DeviceKind::Atc;

/// Decode the first recognized service-data entry.
pub fn decode(service_data: &[ServiceData]) -> Result<Reading, DecodeError> {
    if service_data.is_empty() {
        return Err(DecodeError::MissingData { vendor: VENDOR });
    }

    for entry in service_data {
        match entry.uuid {
            SERVICE_UUID if entry.data.len() == CUSTOM_FRAME_LEN => {
                return Ok(decode_custom(&entry.data));
            }
            SERVICE_UUID => {
                return Err(DecodeError::UnsupportedFormat {
                    vendor: VENDOR,
                    reason: format!("{}-byte frame on 0x181A", entry.data.len()),
                });
            }
            XIAOMI_SERVICE_UUID => {
                return Err(DecodeError::UnsupportedFormat {
                    vendor: VENDOR,
                    reason: "Xiaomi native frame (0xFE95)".into(),
                });
            }
            _ => {}
        }
    }

    Err(DecodeError::FrameNotFound { vendor: VENDOR })
}

fn decode_custom(frame: &[u8]) -> Reading {
    let temperature = le_u16(frame, 6) as i16;

    Reading {
        temperature: f64::from(temperature) / 100.0,
        humidity: f64::from(le_u16(frame, 8)) / 100.0,
        pressure: 0.0,
        battery_level: u16::from(frame[12]),
        battery_voltage: f64::from(le_u16(frame, 10)) / 1000.0,
        counter: u32::from(frame[13]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ATC_FRAME;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_decode_custom_frame() {
        let reading = decode(&[ServiceData::new(SERVICE_UUID, ATC_FRAME)]).unwrap();

        assert!((reading.temperature - 23.08).abs() < 0.01);
        assert!(close(reading.humidity, 34.67));
        assert!(close(reading.battery_voltage, 2.984));
        assert_eq!(reading.battery_level, 87);
        assert_eq!(reading.counter, 23);
        assert_eq!(reading.pressure, 0.0);
    }

    #[test]
    fn test_negative_temperature() {
        let mut frame = ATC_FRAME;
        // -5.25 °C = -525 = 0xFDF3
        frame[6] = 0xF3;
        frame[7] = 0xFD;
        let reading = decode(&[ServiceData::new(SERVICE_UUID, frame)]).unwrap();
        assert!(close(reading.temperature, -5.25));
    }

    #[test]
    fn test_empty_service_data() {
        assert_eq!(
            decode(&[]),
            Err(DecodeError::MissingData { vendor: VENDOR })
        );
    }

    #[test]
    fn test_skips_unrelated_entries() {
        let entries = [
            ServiceData::new(0xFCD2, vec![0x40, 0x00]),
            ServiceData::new(SERVICE_UUID, ATC_FRAME),
        ];
        let reading = decode(&entries).unwrap();
        assert_eq!(reading.counter, 23);
    }

    #[test]
    fn test_frame_not_found() {
        let entries = [ServiceData::new(0xFCD2, vec![0x40, 0x00])];
        assert_eq!(
            decode(&entries),
            Err(DecodeError::FrameNotFound { vendor: VENDOR })
        );
    }

    #[test]
    fn test_atc1441_layout_unsupported() {
        let entries = [ServiceData::new(SERVICE_UUID, vec![0u8; 12])];
        assert!(matches!(
            decode(&entries),
            Err(DecodeError::UnsupportedFormat { vendor: VENDOR, .. })
        ));
    }

    #[test]
    fn test_xiaomi_frame_unsupported() {
        let entries = [
            ServiceData::new(XIAOMI_SERVICE_UUID, vec![0u8; 17]),
            ServiceData::new(SERVICE_UUID, ATC_FRAME),
        ];
        // first recognized entry decides
        assert!(matches!(
            decode(&entries),
            Err(DecodeError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let entries = [ServiceData::new(SERVICE_UUID, ATC_FRAME)];
        let a = decode(&entries).unwrap();
        let b = decode(&entries).unwrap();
        assert_eq!(a.temperature.to_bits(), b.temperature.to_bits());
        assert_eq!(a.humidity.to_bits(), b.humidity.to_bits());
        assert_eq!(a.battery_voltage.to_bits(), b.battery_voltage.to_bits());
        assert_eq!(a, b);
    }
}
