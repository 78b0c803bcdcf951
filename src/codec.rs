//! Bit-packing codecs for the sensor frame fields.
//!
//! The device mixes little-endian, byte-swapped (big-endian) and one
//! hardware-specific 16-bit encoding within a single frame. All decoders are
//! pure functions over the first bytes of the given slice.

/// Decode a signed 16-bit little-endian integer.
pub fn read_i16_le(data: &[u8]) -> i16 {
    i16::from_le_bytes([data[0], data[1]])
}

/// Decode a signed 24-bit little-endian integer, sign-extended to 32 bits.
pub fn read_i24_le(data: &[u8]) -> i32 {
    let raw = (data[0] as i32) | (data[1] as i32) << 8 | (data[2] as i32) << 16;
    (raw << 8) >> 8
}

/// Decode a signed 32-bit little-endian integer.
pub fn read_i32_le(data: &[u8]) -> i32 {
    i32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// Decode a signed 16-bit integer stored byte-swapped (big-endian).
pub fn read_i16_be(data: &[u8]) -> i16 {
    i16::from_be_bytes([data[0], data[1]])
}

/// Decode a signed 32-bit integer stored byte-swapped (big-endian).
pub fn read_i32_be(data: &[u8]) -> i32 {
    i32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

/// Decode the magnetometer's 16-bit axis format: the low byte is taken
/// verbatim and the high byte has its sign bit flipped before assembly.
///
/// This is a quirk of the magnetometer silicon and is reproduced bit for
/// bit; do not "fix" it into a plain little-endian read.
pub fn read_i16_bizarre(data: &[u8]) -> i16 {
    i16::from_le_bytes([data[0], data[1] ^ 0x80])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_le_literals() {
        assert_eq!(read_i16_le(&[0x34, 0x02]), 0x0234);
        assert_eq!(read_i16_le(&[0x00, 0x80]), i16::MIN);
        assert_eq!(read_i16_le(&[0xff, 0xff]), -1);
    }

    #[test]
    fn i24_le_literals() {
        assert_eq!(read_i24_le(&[0x01, 0x00, 0x00]), 1);
        assert_eq!(read_i24_le(&[0xff, 0xff, 0xff]), -1);
        assert_eq!(read_i24_le(&[0x00, 0x00, 0x80]), -8_388_608);
        assert_eq!(read_i24_le(&[0xff, 0xff, 0x7f]), 8_388_607);
    }

    #[test]
    fn i32_le_literals() {
        assert_eq!(read_i32_le(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(read_i32_le(&[0xff, 0xff, 0xff, 0xff]), -1);
    }

    #[test]
    fn swapped_literals() {
        assert_eq!(read_i16_be(&[0x02, 0x34]), 0x0234);
        assert_eq!(read_i16_be(&[0x80, 0x00]), i16::MIN);
        assert_eq!(read_i32_be(&[0x12, 0x34, 0x56, 0x78]), 0x1234_5678);
        assert_eq!(read_i32_be(&[0x80, 0x00, 0x00, 0x00]), i32::MIN);
    }

    #[test]
    fn bizarre_matches_sign_flipped_le() {
        // The bizarre format is a little-endian read with the high byte's
        // sign bit inverted.
        assert_eq!(
            read_i16_bizarre(&[0x34, 0x02]),
            read_i16_le(&[0x34, 0x02 ^ 0x80])
        );
        assert_eq!(read_i16_bizarre(&[0x34, 0x02]), -32_204);
        assert_eq!(read_i16_bizarre(&[0x00, 0x80]), 0);
        assert_eq!(read_i16_bizarre(&[0xff, 0x7f]), -1);
        assert_eq!(read_i16_bizarre(&[0xff, 0xff]), 0x7fff);
    }
}
