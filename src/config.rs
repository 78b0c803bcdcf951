//! Driver tunables.

use fusion_ahrs::{AhrsSettings, Convention};
use serde::{Deserialize, Serialize};

/// Session configuration. The defaults reproduce the reference driver's
/// fixed settings; overriding them is only useful for experimentation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Declared sensor sample rate in Hz.
    pub sample_rate: u32,
    /// AHRS algorithm gain.
    pub gain: f32,
    /// Gyroscope range in deg/s handed to the AHRS for overflow recovery.
    pub gyroscope_range: f32,
    /// Acceleration rejection threshold (degrees).
    pub acceleration_rejection: f32,
    /// Magnetic rejection threshold (degrees).
    pub magnetic_rejection: f32,
    /// Rejection recovery window in seconds.
    pub recovery_trigger_seconds: u32,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1000,
            gain: 0.5,
            gyroscope_range: 2000.0,
            acceleration_rejection: 10.0,
            magnetic_rejection: 20.0,
            recovery_trigger_seconds: 5,
        }
    }
}

impl ImuConfig {
    /// Settings handed to the fusion engine. The device frame is remapped
    /// into a NED-style convention before fusion.
    pub(crate) fn ahrs_settings(&self) -> AhrsSettings {
        AhrsSettings {
            convention: Convention::Ned,
            gain: self.gain,
            gyroscope_range: self.gyroscope_range,
            acceleration_rejection: self.acceleration_rejection,
            magnetic_rejection: self.magnetic_rejection,
            recovery_trigger_period: self.recovery_trigger_seconds * self.sample_rate,
        }
    }
}
