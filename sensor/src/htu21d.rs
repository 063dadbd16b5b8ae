//! HTU21D measurement decoding.

use weather_common::SensorError;

pub const ADDRESS: u8 = 0x40;
pub const TRIGGER_TEMP_NO_HOLD: u8 = 0xF3;
pub const TRIGGER_HUMIDITY_NO_HOLD: u8 = 0xF5;
pub const SOFT_RESET: u8 = 0xFE;

/// Worst-case conversion times at the default 14-bit / 12-bit resolution.
pub const TEMP_CONVERSION_MS: u32 = 50;
pub const HUMIDITY_CONVERSION_MS: u32 = 16;

const CRC_POLYNOMIAL: u16 = 0x131;

/// CRC-8 over the two measurement bytes, polynomial x^8 + x^5 + x^4 + 1.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC_POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    (crc & 0xFF) as u8
}

/// Validate a `[msb, lsb, crc]` frame and return the raw reading with the
/// status bits cleared.
pub fn raw_value(frame: [u8; 3]) -> Result<u16, SensorError> {
    if crc8(&frame[..2]) != frame[2] {
        return Err(SensorError::Checksum);
    }
    Ok(u16::from_be_bytes([frame[0], frame[1]]) & 0xFFFC)
}

pub fn temperature_c(raw: u16) -> f32 {
    -46.85 + 175.72 * f32::from(raw) / 65_536.0
}

pub fn relative_humidity(raw: u16) -> f32 {
    -6.0 + 125.0 * f32::from(raw) / 65_536.0
}
