//! HID transport boundary.
//!
//! The protocol and session layers talk to the glasses through the
//! [`Transport`] trait, so everything above this module can be driven by a
//! scripted in-memory transport in tests. The real implementation wraps
//! `hidapi` and selects the IMU interface of whichever supported glasses are
//! plugged in.

use thiserror::Error;
use tracing::{debug, info};

use crate::error::{ImuError, Result};

/// USB vendor id shared by all XREAL glasses.
pub const XREAL_VENDOR_ID: u16 = 0x3318;

/// Largest single HID transfer the device accepts.
pub const MAX_TRANSFER_SIZE: usize = 64;

/// Opaque transport failure. The session layer decides whether it is fatal
/// (a hard read error means the device is gone) or a protocol-level failure
/// (a short write fails that one exchange).
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Byte-oriented request/response channel to the device.
pub trait Transport {
    /// Blocking read. Returns the number of bytes received.
    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError>;

    /// Read with a timeout in milliseconds. Returns `Ok(0)` when the timeout
    /// expires without data.
    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout_ms: i32,
    ) -> std::result::Result<usize, TransportError>;

    /// Write a buffer. Returns the number of bytes the device accepted.
    fn write(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError>;
}

/// IMU interface number for a given product id, if the product carries one.
///
/// Air, Air 2 and Air 2 Pro expose the IMU on HID interface 3; the Air 2
/// Ultra moved it to interface 2.
pub fn imu_interface_id(product_id: u16) -> Option<i32> {
    match product_id {
        // Air, Air 2, Air 2 Pro
        0x0424 | 0x0428 | 0x0432 => Some(3),
        // Air 2 Ultra
        0x0426 => Some(2),
        _ => None,
    }
}

/// `hidapi`-backed transport.
pub struct HidTransport {
    device: hidapi::HidDevice,
    product_id: u16,
}

impl HidTransport {
    /// Enumerate HID devices and open the IMU interface of the first set of
    /// glasses matching `vendor_id` and `product_id` (0 matches any product).
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self> {
        let api = hidapi::HidApi::new()
            .map_err(|e| ImuError::NotInitialized(e.to_string()))?;

        for info in api.device_list() {
            if info.vendor_id() != vendor_id {
                continue;
            }
            if product_id != 0 && info.product_id() != product_id {
                continue;
            }
            let Some(interface) = imu_interface_id(info.product_id()) else {
                continue;
            };
            if info.interface_number() != interface {
                continue;
            }

            info!(
                product_id = format!("{:04x}", info.product_id()),
                interface,
                "Found IMU interface"
            );

            let device = api.open_path(info.path()).map_err(|e| {
                debug!(?e, "Opening HID path failed");
                ImuError::NoHandle
            })?;

            return Ok(Self {
                device,
                product_id: info.product_id(),
            });
        }

        Err(ImuError::NoHandle)
    }

    /// Product id of the opened glasses.
    pub fn product_id(&self) -> u16 {
        self.product_id
    }
}

impl Transport for HidTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
        self.device
            .read(buf)
            .map_err(|e| TransportError(e.to_string()))
    }

    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout_ms: i32,
    ) -> std::result::Result<usize, TransportError> {
        self.device
            .read_timeout(buf, timeout_ms)
            .map_err(|e| TransportError(e.to_string()))
    }

    fn write(&mut self, data: &[u8]) -> std::result::Result<usize, TransportError> {
        self.device
            .write(data)
            .map_err(|e| TransportError(e.to_string()))
    }
}
