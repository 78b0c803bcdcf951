//! Raw 64-byte sensor frame decoding.
//!
//! Streamed sensor frames are not wrapped in the control framing; they are
//! raw 64-byte transfers with a two-byte signature. Each sensor block holds
//! raw integer axes plus a shared multiplier/divisor pair supplied by the
//! device, so decoded values are already in physical units: deg/s for the
//! gyroscope, g for the accelerometer, and uT for the magnetometer.
//!
//! Layout (offsets in bytes):
//!
//! ```text
//!  0  signature[2]          42  mag multiplier  i16 swapped
//!  2  timestamp   u64 LE    44  mag divisor     i32 swapped
//! 10  temperature i16 LE    48  mag x/y/z       3 x i16 bizarre
//! 12  gyro multiplier i16   54  reserved[10]
//! 14  gyro divisor    i32
//! 18  gyro x/y/z  3 x i24
//! 27  accel multiplier i16
//! 29  accel divisor    i32
//! 33  accel x/y/z 3 x i24
//! ```

use nalgebra::Vector3;

use crate::codec::{read_i16_be, read_i16_bizarre, read_i16_le, read_i24_le, read_i32_be, read_i32_le};

/// Size of every streamed sensor transfer.
pub const SAMPLE_FRAME_SIZE: usize = 64;

/// Signature of a sensor data frame.
pub const DATA_SIGNATURE: [u8; 2] = [0x01, 0x02];

/// Signature of the init marker the device emits when its stream (re)starts.
pub const INIT_SIGNATURE: [u8; 2] = [0xaa, 0x53];

/// ICM-42688-P temperature conversion: offset 25 degC, 132.48 LSB/degC.
const TEMPERATURE_SENSITIVITY: f32 = 132.48;
const TEMPERATURE_OFFSET: f32 = 25.0;

/// One decoded axis block: three raw axes and the shared scale pair.
#[derive(Debug, Clone, Copy)]
struct AxisBlock {
    raw: [i32; 3],
    multiplier: i32,
    divisor: i32,
}

impl AxisBlock {
    /// `raw * multiplier / divisor` per axis, in floating point. A zero
    /// divisor propagates as a non-finite value rather than trapping;
    /// downstream treats non-finite readings as a signal.
    fn scaled(&self) -> Vector3<f32> {
        let m = self.multiplier as f32;
        let d = self.divisor as f32;
        Vector3::new(
            self.raw[0] as f32 * m / d,
            self.raw[1] as f32 * m / d,
            self.raw[2] as f32 * m / d,
        )
    }
}

/// A decoded raw sensor frame.
#[derive(Debug, Clone, Copy)]
pub struct RawSampleFrame {
    pub signature: [u8; 2],
    /// Device timestamp in nanoseconds.
    pub timestamp: u64,
    /// Raw temperature register value.
    pub temperature_raw: i16,
    gyroscope: AxisBlock,
    accelerometer: AxisBlock,
    magnetometer: AxisBlock,
}

impl RawSampleFrame {
    /// Decode a full 64-byte transfer.
    pub fn parse(bytes: &[u8; SAMPLE_FRAME_SIZE]) -> Self {
        Self {
            signature: [bytes[0], bytes[1]],
            timestamp: u64::from_le_bytes(bytes[2..10].try_into().unwrap()),
            temperature_raw: read_i16_le(&bytes[10..12]),
            gyroscope: AxisBlock {
                multiplier: read_i16_le(&bytes[12..14]) as i32,
                divisor: read_i32_le(&bytes[14..18]),
                raw: [
                    read_i24_le(&bytes[18..21]),
                    read_i24_le(&bytes[21..24]),
                    read_i24_le(&bytes[24..27]),
                ],
            },
            accelerometer: AxisBlock {
                multiplier: read_i16_le(&bytes[27..29]) as i32,
                divisor: read_i32_le(&bytes[29..33]),
                raw: [
                    read_i24_le(&bytes[33..36]),
                    read_i24_le(&bytes[36..39]),
                    read_i24_le(&bytes[39..42]),
                ],
            },
            magnetometer: AxisBlock {
                multiplier: read_i16_be(&bytes[42..44]) as i32,
                divisor: read_i32_be(&bytes[44..48]),
                raw: [
                    read_i16_bizarre(&bytes[48..50]) as i32,
                    read_i16_bizarre(&bytes[50..52]) as i32,
                    read_i16_bizarre(&bytes[52..54]) as i32,
                ],
            },
        }
    }

    pub fn is_data(&self) -> bool {
        self.signature == DATA_SIGNATURE
    }

    pub fn is_init(&self) -> bool {
        self.signature == INIT_SIGNATURE
    }

    /// Angular velocity in device axes, deg/s.
    pub fn gyroscope(&self) -> Vector3<f32> {
        self.gyroscope.scaled()
    }

    /// Acceleration in device axes, g.
    pub fn accelerometer(&self) -> Vector3<f32> {
        self.accelerometer.scaled()
    }

    /// Magnetic field in device axes.
    pub fn magnetometer(&self) -> Vector3<f32> {
        self.magnetometer.scaled()
    }

    /// Die temperature in degrees Celsius.
    pub fn temperature_celsius(&self) -> f32 {
        self.temperature_raw as f32 / TEMPERATURE_SENSITIVITY + TEMPERATURE_OFFSET
    }
}
