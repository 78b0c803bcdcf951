//! Per-device sensor calibration.
//!
//! The calibration record mirrors what the glasses ship in their onboard
//! JSON document: a misalignment matrix, sensitivity vector and offset
//! vector per sensor, plus soft/hard iron corrections for the magnetometer
//! and a vector of fusion noise hints. It can also be persisted to disk as
//! a fixed-size binary blob and restored later.
//!
//! Raw readings pass through a fixed axis remap into the fusion engine's
//! right-handed frame, the affine calibration, the online iron-offset
//! correction (magnetometer only), and the inverse remap back into the
//! caller-facing frame.

use std::f32::consts::PI;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use nalgebra::{Matrix3, Quaternion, Vector3};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ImuError, Result};

/// Standard gravity, m/s^2 per g.
pub const GRAVITY_G: f32 = 9.806;

/// Size of the persisted binary record:
/// 3 sensors x (9 + 3 + 3) f32, soft iron 9 f32, hard iron 3 f32,
/// noises 4 f32.
pub const RECORD_SIZE: usize = 244;

/// Affine calibration parameters for one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorCalibration {
    /// 3x3 correction for non-orthogonal sensor axes.
    pub misalignment: Matrix3<f32>,
    /// Per-axis scale factors.
    pub sensitivity: Vector3<f32>,
    /// Bias subtracted after scaling.
    pub offset: Vector3<f32>,
}

impl Default for SensorCalibration {
    fn default() -> Self {
        Self {
            misalignment: Matrix3::identity(),
            sensitivity: Vector3::new(1.0, 1.0, 1.0),
            offset: Vector3::zeros(),
        }
    }
}

impl SensorCalibration {
    /// `misalignment * ((raw . sensitivity) - offset)`.
    pub fn apply(&self, raw: Vector3<f32>) -> Vector3<f32> {
        self.apply_with_offset(raw, self.offset)
    }

    /// Same as [`apply`](Self::apply) with a substitute offset, used where
    /// the persisted offset needs a unit conversion first.
    pub fn apply_with_offset(&self, raw: Vector3<f32>, offset: Vector3<f32>) -> Vector3<f32> {
        self.misalignment * (raw.component_mul(&self.sensitivity) - offset)
    }
}

/// The complete per-device calibration state.
///
/// All matrices default to identity and sensitivities to one, so a fresh
/// record passes readings through unchanged until a calibration download, a
/// file load, or the stationary-calibration routine overwrites it.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    /// Gyroscope calibration; offset persisted in rad/s.
    pub gyroscope: SensorCalibration,
    /// Accelerometer calibration; offset persisted in m/s^2.
    pub accelerometer: SensorCalibration,
    pub magnetometer: SensorCalibration,
    pub soft_iron_matrix: Matrix3<f32>,
    pub hard_iron_offset: Vector3<f32>,
    /// Per-axis + scalar fusion noise hints (x, y, z, w), currently only
    /// carried through from the device document.
    pub noises: [f32; 4],
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            gyroscope: SensorCalibration::default(),
            accelerometer: SensorCalibration::default(),
            magnetometer: SensorCalibration::default(),
            soft_iron_matrix: Matrix3::identity(),
            hard_iron_offset: Vector3::zeros(),
            noises: [0.0; 4],
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinate remap
// ---------------------------------------------------------------------------

/// Device axes into the fusion engine's right-handed convention:
/// `(x, y, z) -> (-x, -z, -y)`. Applied before calibration.
pub(crate) fn remap_device_to_fusion(v: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(-v.x, -v.z, -v.y)
}

/// Fusion frame back into the caller-facing convention:
/// `(x, y, z) -> (+z, +x, +y)`. Applied after calibration.
pub(crate) fn remap_fusion_to_output(v: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(v.z, v.x, v.y)
}

// ---------------------------------------------------------------------------
// Online iron-offset estimation
// ---------------------------------------------------------------------------

/// Running magnetometer extrema, owned by one session.
///
/// Estimates are unstable until samples have been observed across a
/// representative range of orientations; that is inherent to the method.
#[derive(Debug, Clone)]
pub struct IronOffsetEstimator {
    min: Vector3<f32>,
    max: Vector3<f32>,
}

impl Default for IronOffsetEstimator {
    fn default() -> Self {
        Self {
            min: Vector3::repeat(f32::INFINITY),
            max: Vector3::repeat(f32::NEG_INFINITY),
        }
    }
}

impl IronOffsetEstimator {
    /// Fold one magnetometer sample into the extrema and return the current
    /// `(soft_iron_matrix, hard_iron_offset)` estimate.
    pub fn observe(&mut self, magnetometer: &Vector3<f32>) -> (Matrix3<f32>, Vector3<f32>) {
        for i in 0..3 {
            self.max[i] = self.max[i].max(magnetometer[i]);
            self.min[i] = self.min[i].min(magnetometer[i]);
        }

        let half_range = (self.max - self.min) / 2.0;
        let center = (self.max + self.min) / 2.0;

        let soft_iron = Matrix3::from_diagonal(&Vector3::new(
            1.0 / half_range.x,
            1.0 / half_range.y,
            1.0 / half_range.z,
        ));

        (soft_iron, center)
    }
}

// ---------------------------------------------------------------------------
// Calibration application
// ---------------------------------------------------------------------------

impl CalibrationRecord {
    /// Run one raw sample through remap, affine calibration and the iron
    /// estimate, returning calibrated vectors in the caller-facing frame.
    ///
    /// The persisted gyroscope offset is stored in rad/s and the
    /// accelerometer offset in m/s^2; both are converted to the units the
    /// fusion engine expects (deg/s and g) at application time. The iron
    /// estimate is recomputed from this sample and written back into the
    /// record.
    pub fn apply(
        &mut self,
        iron: &mut IronOffsetEstimator,
        gyroscope: Vector3<f32>,
        accelerometer: Vector3<f32>,
        magnetometer: Vector3<f32>,
    ) -> (Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        let gyro_offset = self.gyroscope.offset * (180.0 / PI);
        let accel_offset = self.accelerometer.offset / GRAVITY_G;

        let g = remap_device_to_fusion(gyroscope);
        let a = remap_device_to_fusion(accelerometer);
        let m = remap_device_to_fusion(magnetometer);

        let g = self.gyroscope.apply_with_offset(g, gyro_offset);
        let a = self.accelerometer.apply_with_offset(a, accel_offset);
        let m = self.magnetometer.apply(m);

        let (soft_iron, hard_iron) = iron.observe(&m);
        self.soft_iron_matrix = soft_iron;
        self.hard_iron_offset = hard_iron;

        let m = soft_iron * (m - hard_iron);

        (
            remap_fusion_to_output(g),
            remap_fusion_to_output(a),
            remap_fusion_to_output(m),
        )
    }
}

// ---------------------------------------------------------------------------
// Binary persistence
// ---------------------------------------------------------------------------

fn put_matrix(out: &mut Vec<u8>, m: &Matrix3<f32>) {
    // Row-major, matching the field order of the device record.
    for row in 0..3 {
        for col in 0..3 {
            out.extend_from_slice(&m[(row, col)].to_le_bytes());
        }
    }
}

fn put_vector(out: &mut Vec<u8>, v: &Vector3<f32>) {
    for i in 0..3 {
        out.extend_from_slice(&v[i].to_le_bytes());
    }
}

struct RecordReader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> RecordReader<'a> {
    fn f32(&mut self) -> f32 {
        let v = f32::from_le_bytes(self.bytes[self.at..self.at + 4].try_into().unwrap());
        self.at += 4;
        v
    }

    fn matrix(&mut self) -> Matrix3<f32> {
        let mut m = Matrix3::zeros();
        for row in 0..3 {
            for col in 0..3 {
                m[(row, col)] = self.f32();
            }
        }
        m
    }

    fn vector(&mut self) -> Vector3<f32> {
        Vector3::new(self.f32(), self.f32(), self.f32())
    }
}

impl CalibrationRecord {
    /// Serialize to the fixed little-endian layout.
    ///
    /// The layout carries no header or version field; any change to it is a
    /// breaking change for persisted files.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = Vec::with_capacity(RECORD_SIZE);
        for sensor in [&self.gyroscope, &self.accelerometer, &self.magnetometer] {
            put_matrix(&mut out, &sensor.misalignment);
            put_vector(&mut out, &sensor.sensitivity);
            put_vector(&mut out, &sensor.offset);
        }
        put_matrix(&mut out, &self.soft_iron_matrix);
        put_vector(&mut out, &self.hard_iron_offset);
        for n in self.noises {
            out.extend_from_slice(&n.to_le_bytes());
        }

        out.try_into().expect("record layout is fixed-size")
    }

    /// Deserialize from the fixed little-endian layout.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut r = RecordReader { bytes, at: 0 };
        let mut sensors = [SensorCalibration::default(); 3];
        for sensor in sensors.iter_mut() {
            sensor.misalignment = r.matrix();
            sensor.sensitivity = r.vector();
            sensor.offset = r.vector();
        }
        let soft_iron_matrix = r.matrix();
        let hard_iron_offset = r.vector();
        let noises = [r.f32(), r.f32(), r.f32(), r.f32()];

        Self {
            gyroscope: sensors[0],
            accelerometer: sensors[1],
            magnetometer: sensors[2],
            soft_iron_matrix,
            hard_iron_offset,
            noises,
        }
    }

    /// Load a record from `path`, replacing `self` only on success.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::open(path.as_ref()).map_err(ImuError::FileNotOpen)?;

        let mut bytes = [0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match file.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(_) => break,
            }
        }
        if filled != RECORD_SIZE {
            warn!(path = %path.as_ref().display(), filled, "Calibration not fully loaded");
            return Err(ImuError::LoadIncomplete);
        }

        *self = Self::from_bytes(&bytes);
        debug!(path = %path.as_ref().display(), "Calibration loaded");
        Ok(())
    }

    /// Save the record to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path.as_ref()).map_err(ImuError::FileNotOpen)?;

        let result = file
            .write_all(&self.to_bytes())
            .map_err(|_| ImuError::SaveIncomplete);
        // Flush to disk even when the write came up short.
        file.sync_all().map_err(ImuError::FileNotClosed)?;

        result?;
        debug!(path = %path.as_ref().display(), "Calibration saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Device JSON document
// ---------------------------------------------------------------------------

fn json_vector(value: Option<&Value>) -> Vector3<f32> {
    let Some(Value::Array(items)) = value else {
        return Vector3::zeros();
    };
    if items.len() != 3 {
        return Vector3::zeros();
    }
    Vector3::new(
        items[0].as_f64().unwrap_or(0.0) as f32,
        items[1].as_f64().unwrap_or(0.0) as f32,
        items[2].as_f64().unwrap_or(0.0) as f32,
    )
}

fn json_quaternion(value: Option<&Value>) -> Quaternion<f32> {
    let Some(Value::Array(items)) = value else {
        return Quaternion::identity();
    };
    if items.len() != 4 {
        return Quaternion::identity();
    }
    // Stored as (x, y, z, w).
    Quaternion::new(
        items[3].as_f64().unwrap_or(0.0) as f32,
        items[0].as_f64().unwrap_or(0.0) as f32,
        items[1].as_f64().unwrap_or(0.0) as f32,
        items[2].as_f64().unwrap_or(0.0) as f32,
    )
}

/// Rotation matrix from quaternion components taken verbatim, without
/// normalization; a non-unit quaternion scales the result accordingly.
fn quaternion_matrix(q: Quaternion<f32>) -> Matrix3<f32> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    Matrix3::new(
        2.0 * (w * w - 0.5 + x * x),
        2.0 * (x * y - w * z),
        2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),
        2.0 * (w * w - 0.5 + y * y),
        2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),
        2.0 * (y * z + w * x),
        2.0 * (w * w - 0.5 + z * z),
    )
}

impl CalibrationRecord {
    /// Install the values of a downloaded calibration document.
    ///
    /// The document nests per-device values under `IMU.device_1`: bias and
    /// scale vectors per sensor, the accel->gyro and gyro->mag alignment
    /// quaternions, and the noise quaternion. Missing or malformed fields
    /// fall back to zero vectors / identity quaternions rather than failing;
    /// a document that does not parse at all installs nothing.
    pub fn apply_device_json(&mut self, blob: &[u8]) {
        let root: Value = match serde_json::from_slice(blob) {
            Ok(root) => root,
            Err(e) => {
                warn!(?e, "Calibration document is not valid JSON, keeping current values");
                return;
            }
        };
        let dev = root.get("IMU").and_then(|imu| imu.get("device_1"));

        let accel_bias = json_vector(dev.and_then(|d| d.get("accel_bias")));
        let accel_q_gyro = json_quaternion(dev.and_then(|d| d.get("accel_q_gyro")));
        let gyro_bias = json_vector(dev.and_then(|d| d.get("gyro_bias")));
        let gyro_q_mag = json_quaternion(dev.and_then(|d| d.get("gyro_q_mag")));
        let mag_bias = json_vector(dev.and_then(|d| d.get("mag_bias")));
        let imu_noises = json_quaternion(dev.and_then(|d| d.get("imu_noises")));
        let scale_accel = json_vector(dev.and_then(|d| d.get("scale_accel")));
        let scale_gyro = json_vector(dev.and_then(|d| d.get("scale_gyro")));
        let scale_mag = json_vector(dev.and_then(|d| d.get("scale_mag")));

        let accel_q_mag = accel_q_gyro * gyro_q_mag;

        self.gyroscope.misalignment = quaternion_matrix(accel_q_gyro);
        self.gyroscope.sensitivity = scale_gyro;
        self.gyroscope.offset = gyro_bias;

        self.accelerometer.misalignment = Matrix3::identity();
        self.accelerometer.sensitivity = scale_accel;
        self.accelerometer.offset = accel_bias;

        self.magnetometer.misalignment = quaternion_matrix(accel_q_mag);
        self.magnetometer.sensitivity = scale_mag;
        self.magnetometer.offset = mag_bias;

        self.noises = [imu_noises.i, imu_noises.j, imu_noises.k, imu_noises.w];
    }
}
