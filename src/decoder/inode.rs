//! Decoder for iNode Care sensor manufacturer data.
//!
//! Offsets count from the start of the manufacturer-specific payload, company
//! identifier included. All fields are little-endian `u16`:
//!
//! | bytes   | field                                        |
//! |---------|----------------------------------------------|
//! | 2..4    | status word, bits 12..16 battery code        |
//! | 6..8    | pressure, 1/16 hPa                           |
//! | 8..10   | raw temperature                              |
//! | 10..12  | raw humidity                                 |
//! | 12..14  | counter high word                            |
//! | 14..16  | counter low word                             |

use super::{DecodeError, DeviceKind, Reading, le_u16};

/// Shortest manufacturer payload that contains every field.
pub const MIN_FRAME_LEN: usize = 16;

pub const TEMPERATURE_RANGE: (f64, f64) = (-30.0, 70.0);
pub const HUMIDITY_RANGE: (f64, f64) = (1.0, 100.0);

const VENDOR: DeviceKind = DeviceKind::Inode;

pub fn decode(frame: &[u8]) -> Result<Reading, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::MissingData { vendor: VENDOR });
    }
    if frame.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TruncatedFrame {
            vendor: VENDOR,
            len: frame.len(),
            expected: MIN_FRAME_LEN,
        });
    }

    let battery_level = battery_level((le_u16(frame, 2) >> 12) & 0xFF);

    Ok(Reading {
        temperature: temperature(le_u16(frame, 8)),
        humidity: humidity(le_u16(frame, 10)),
        pressure: f64::from(le_u16(frame, 6)) / 16.0,
        battery_level,
        battery_voltage: battery_voltage(battery_level),
        counter: (u32::from(le_u16(frame, 12)) << 16) | u32::from(le_u16(frame, 14)),
    })
}

/// Map the 4-bit battery code to a percentage.
///
/// Code 1 means full. Otherwise each step is 10 %, saturating at 100 % from code 11.
pub fn battery_level(code: u16) -> u16 {
    if code == 1 {
        100
    } else {
        10 * code.min(11).saturating_sub(1)
    }
}

/// Linear fit of the vendor's level-to-voltage table.
pub fn battery_voltage(level: u16) -> f64 {
    (f64::from(level) - 10.0) * 1.2 / 100.0 + 1.8
}

pub fn temperature(raw: u16) -> f64 {
    let celsius = 175.72 * f64::from(raw) * 4.0 / 65536.0 - 46.85;
    celsius.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)
}

pub fn humidity(raw: u16) -> f64 {
    let percent = 125.0 * f64::from(raw) * 4.0 / 65536.0 - 6.0;
    percent.clamp(HUMIDITY_RANGE.0, HUMIDITY_RANGE.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::INODE_FRAME;

    #[test]
    fn test_decode_reference_frame() {
        let reading = decode(&INODE_FRAME).unwrap();

        assert!((reading.temperature - 4.2658).abs() < 0.01);
        assert_eq!(reading.pressure, 1006.5);
        assert!((reading.humidity - 76.4966).abs() < 0.001);
        assert_eq!(reading.battery_level, 90);
        assert!((reading.battery_voltage - 2.76).abs() < 1e-9);
        assert_eq!(reading.counter, (21 << 16) | 0xDDFA);
    }

    #[test]
    fn test_battery_code_mapping() {
        assert_eq!(battery_level(0), 0);
        assert_eq!(battery_level(1), 100);
        assert_eq!(battery_level(2), 10);
        assert_eq!(battery_level(5), 40);
        assert_eq!(battery_level(10), 90);
        assert_eq!(battery_level(11), 100);
        assert_eq!(battery_level(12), 100);
        assert_eq!(battery_level(15), 100);
    }

    #[test]
    fn test_battery_voltage_fit() {
        assert!((battery_voltage(10) - 1.8).abs() < 1e-12);
        assert!((battery_voltage(100) - 2.88).abs() < 1e-12);
        assert!((battery_voltage(0) - 1.68).abs() < 1e-12);
    }

    #[test]
    fn test_temperature_clamped_to_bounds() {
        assert_eq!(temperature(0), -30.0);
        assert_eq!(temperature(u16::MAX), 70.0);
        // 25.0 °C sits well inside the range
        let raw = ((25.0 + 46.85) * 65536.0 / (175.72 * 4.0)) as u16;
        assert!((temperature(raw) - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_humidity_clamped_to_bounds() {
        assert_eq!(humidity(0), 1.0);
        assert_eq!(humidity(u16::MAX), 100.0);
    }

    #[test]
    fn test_battery_code_from_status_word() {
        let mut frame = INODE_FRAME;
        // status word 0x1000 -> code 1 -> full
        frame[2] = 0x00;
        frame[3] = 0x10;
        assert_eq!(decode(&frame).unwrap().battery_level, 100);

        // status word 0x0000 -> code 0 -> empty, not wrapped
        frame[3] = 0x00;
        let reading = decode(&frame).unwrap();
        assert_eq!(reading.battery_level, 0);
        assert!((reading.battery_voltage - 1.68).abs() < 1e-12);
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(
            decode(&[]),
            Err(DecodeError::MissingData { vendor: VENDOR })
        );
    }

    #[test]
    fn test_truncated_payload() {
        assert_eq!(
            decode(&INODE_FRAME[..15]),
            Err(DecodeError::TruncatedFrame {
                vendor: VENDOR,
                len: 15,
                expected: MIN_FRAME_LEN,
            })
        );
        assert!(decode(&INODE_FRAME[..MIN_FRAME_LEN]).is_ok());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let a = decode(&INODE_FRAME).unwrap();
        let b = decode(&INODE_FRAME).unwrap();
        assert_eq!(a.temperature.to_bits(), b.temperature.to_bits());
        assert_eq!(a.humidity.to_bits(), b.humidity.to_bits());
        assert_eq!(a.pressure.to_bits(), b.pressure.to_bits());
        assert_eq!(a.battery_voltage.to_bits(), b.battery_voltage.to_bits());
        assert_eq!(a.counter, b.counter);
    }
}
