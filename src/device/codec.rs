use crate::error::CodecError;

/// Width of the capsense value sent by the board's firmware.
pub const SENSOR_VALUE_WIDTH: usize = 4;

pub fn encode_control(value: i8) -> [u8; 1] {
    value.to_le_bytes()
}

/// Decodes a capsense payload as a little-endian `i32`.
///
/// Shorter payloads are zero-extended, so a single byte `0xFF` decodes to 255 rather than -1.
pub fn decode_sensor(payload: &[u8]) -> Result<i32, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }

    if payload.len() > SENSOR_VALUE_WIDTH {
        return Err(CodecError::TooLong(payload.len()));
    }

    let mut bytes = [0u8; SENSOR_VALUE_WIDTH];
    bytes[..payload.len()].copy_from_slice(payload);
    Ok(i32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_values_are_single_bytes() {
        assert_eq!(encode_control(1), [0x01]);
        assert_eq!(encode_control(0), [0x00]);
        assert_eq!(encode_control(-1), [0xFF]);
    }

    #[test]
    fn full_width_payload() {
        assert_eq!(decode_sensor(&42i32.to_le_bytes()), Ok(42));
        assert_eq!(decode_sensor(&(-1234i32).to_le_bytes()), Ok(-1234));
    }

    #[test]
    fn short_payload_is_zero_extended() {
        assert_eq!(decode_sensor(&[7]), Ok(7));
        assert_eq!(decode_sensor(&[0xFF]), Ok(255));
        assert_eq!(decode_sensor(&[0x34, 0x12]), Ok(0x1234));
    }

    #[test]
    fn rejects_empty_and_oversized_payloads() {
        assert_eq!(decode_sensor(&[]), Err(CodecError::Empty));
        assert_eq!(decode_sensor(&[0; 8]), Err(CodecError::TooLong(8)));
    }
}
