use thiserror::Error;

/// Errors reported by the IMU driver.
///
/// Every operation returns one of these through [`Result`]; nothing panics.
/// Most variants are recoverable for the session (a dropped frame, a failed
/// calibration download). [`ImuError::Unplugged`] is fatal: the caller should
/// drop the device and may attempt to reopen it.
#[derive(Debug, Error)]
pub enum ImuError {
    /// The HID subsystem could not be initialized.
    #[error("HID subsystem failed to initialize: {0}")]
    NotInitialized(String),

    /// No device with a matching vendor/product id and IMU interface was
    /// found, or opening it failed.
    #[error("no IMU device handle")]
    NoHandle,

    /// The transport accepted fewer bytes than the frame required.
    #[error("sending payload failed")]
    PayloadSendFailed,

    /// No complete reply frame arrived, or its message id did not match the
    /// request. The frame is discarded without resynchronization.
    #[error("receiving payload failed")]
    PayloadRecvFailed,

    /// A frame payload exceeds the 56-byte limit of a single transfer.
    #[error("frame does not fit a single 64-byte transfer")]
    WrongFrameSize,

    /// The calibration file could not be opened.
    #[error("calibration file not opened")]
    FileNotOpen(#[source] std::io::Error),

    /// The calibration file could not be flushed and closed cleanly.
    #[error("calibration file not closed")]
    FileNotClosed(#[source] std::io::Error),

    /// Fewer bytes than a full calibration record were read.
    #[error("calibration record not fully loaded")]
    LoadIncomplete,

    /// Fewer bytes than a full calibration record were written.
    #[error("calibration record not fully saved")]
    SaveIncomplete,

    /// The transport reported a hard error; the device may be unplugged.
    #[error("device may be unplugged")]
    Unplugged,

    /// A sensor read returned neither zero bytes nor a full 64-byte frame.
    #[error("unexpected transfer size: {0} bytes")]
    UnexpectedSize(usize),

    /// A full frame arrived whose signature is neither the data marker nor
    /// the init marker. The frame is dropped.
    #[error("frame signature does not match")]
    WrongSignature,

    /// The fused orientation contains a non-finite component; the event is
    /// suppressed.
    #[error("invalid fused orientation value")]
    InvalidFusedValue,
}

pub type Result<T> = std::result::Result<T, ImuError>;
