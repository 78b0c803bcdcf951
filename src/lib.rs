//! Driver for the IMU in XREAL Air-family glasses.
//!
//! Talks to the glasses over USB HID, downloads and applies the factory
//! calibration stored on the device, decodes the 64-byte sensor frames and
//! feeds the calibrated samples through an AHRS to produce a fused
//! orientation.
//!
//! ```no_run
//! use xreal_air_imu::{ImuDevice, ImuEvent};
//!
//! let mut device = ImuDevice::open(Box::new(|timestamp, event, fusion| {
//!     if event == ImuEvent::Update {
//!         let q = fusion.orientation();
//!         println!("{timestamp} {q:?}");
//!     }
//! }))?;
//!
//! loop {
//!     device.read(100)?;
//! }
//! # Ok::<(), xreal_air_imu::ImuError>(())
//! ```

pub mod calibration;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod sample;
pub mod transport;

pub use calibration::{CalibrationRecord, IronOffsetEstimator, SensorCalibration};
pub use config::ImuConfig;
pub use device::{EulerAngles, FusionSnapshot, ImuCallback, ImuDevice, ImuEvent};
pub use error::{ImuError, Result};
pub use transport::{HidTransport, Transport, XREAL_VENDOR_ID};
