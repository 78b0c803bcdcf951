//! Device session: open/init sequence, streaming reads, stationary
//! calibration, teardown.
//!
//! A session owns the transport, the calibration record, the iron-offset
//! estimator and the fusion engine outright; nothing is shared between
//! sessions and nothing is locked. Every call blocks the calling thread for
//! at most the caller-supplied timeout. Events reach the caller through a
//! callback invoked synchronously from within [`ImuDevice::read`]; the
//! fusion handle passed to it is only valid for the duration of the call.

use std::f32::consts::PI;
use std::path::Path;

use fusion_ahrs::{Ahrs, Offset, OffsetSettings};
use glam::{Quat, Vec3};
use nalgebra::{Matrix3, Vector3};
use tracing::{debug, error, info, trace, warn};

use crate::calibration::{
    remap_device_to_fusion, CalibrationRecord, IronOffsetEstimator, GRAVITY_G,
};
use crate::config::ImuConfig;
use crate::error::{ImuError, Result};
use crate::protocol::{Channel, MsgId};
use crate::sample::{RawSampleFrame, SAMPLE_FRAME_SIZE};
use crate::transport::{HidTransport, Transport, XREAL_VENDOR_ID};

/// Substitute id for devices that do not answer the static-id request.
const STATIC_ID_FALLBACK: u32 = 0x2022_0101;

/// Stale frames discarded after stopping a pre-existing stream.
const CLEAR_MAX_FRAMES: usize = 10;
const CLEAR_TIMEOUT_MS: i32 = 10;

const SIGNAL_STOP: u8 = 0x0;
const SIGNAL_START: u8 = 0x1;

/// Events dispatched to the session callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImuEvent {
    /// The device (re)started its stream; carries a timestamp only.
    Init,
    /// A calibrated sample was fused; orientation and acceleration are
    /// readable from the snapshot.
    Update,
}

/// Orientation as roll/pitch/yaw in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// Borrowed view of the fusion engine, valid only for the duration of a
/// callback invocation.
pub struct FusionSnapshot<'a> {
    ahrs: &'a Ahrs,
}

impl FusionSnapshot<'_> {
    /// Fused orientation quaternion.
    pub fn orientation(&self) -> Quat {
        let coords = self.ahrs.quaternion().into_inner().coords;
        Quat::from_xyzw(coords[0], coords[1], coords[2], coords[3])
    }

    /// Acceleration with gravity removed, in the sensor frame (g).
    pub fn linear_acceleration(&self) -> Vec3 {
        let a = self.ahrs.linear_acceleration();
        Vec3::new(a.x, a.y, a.z)
    }

    /// Acceleration with gravity removed, in the earth frame (g).
    pub fn earth_acceleration(&self) -> Vec3 {
        let a = self.ahrs.earth_acceleration();
        Vec3::new(a.x, a.y, a.z)
    }

    /// Fused orientation as Euler angles, degrees.
    pub fn euler(&self) -> EulerAngles {
        let (roll, pitch, yaw) = self.ahrs.quaternion().euler_angles();
        let to_deg = 180.0 / PI;
        EulerAngles {
            roll: roll * to_deg,
            pitch: pitch * to_deg,
            yaw: yaw * to_deg,
        }
    }
}

/// Session event callback: `(timestamp_ns, event, fusion_snapshot)`.
pub type ImuCallback = Box<dyn FnMut(u64, ImuEvent, FusionSnapshot<'_>)>;

/// An open IMU session.
pub struct ImuDevice<T: Transport> {
    channel: Channel<T>,
    vendor_id: u16,
    product_id: u16,
    static_id: u32,
    config: ImuConfig,
    calibration: CalibrationRecord,
    iron: IronOffsetEstimator,
    ahrs: Ahrs,
    gyro_drift: Offset,
    /// Baseline for delta-time; unset until the first accepted data frame.
    last_timestamp: Option<u64>,
    /// Last die temperature seen, degrees Celsius.
    temperature: f32,
    callback: Option<ImuCallback>,
}

impl ImuDevice<HidTransport> {
    /// Enumerate the glasses over HID and open a streaming session with the
    /// default configuration.
    pub fn open(callback: ImuCallback) -> Result<Self> {
        let transport = HidTransport::open(XREAL_VENDOR_ID, 0)?;
        let product_id = transport.product_id();
        Self::open_with(transport, product_id, ImuConfig::default(), Some(callback))
    }
}

impl<T: Transport> ImuDevice<T> {
    /// Open a session over an already-located transport.
    ///
    /// Runs the full init sequence: stop any pre-existing stream, flush
    /// stale frames, fetch the static id (falling back to a fixed constant),
    /// download and install the device calibration (keeping defaults if the
    /// download fails), start streaming, and initialize the fusion engine
    /// and gyroscope drift tracker. A failure returns `Err` and drops
    /// whatever was built; no partially-open session escapes.
    pub fn open_with(
        transport: T,
        product_id: u16,
        config: ImuConfig,
        callback: Option<ImuCallback>,
    ) -> Result<Self> {
        let mut channel = Channel::new(transport);

        // Force a clean state: the device may still be streaming from a
        // previous session.
        channel.send_signal(MsgId::StartImuData, SIGNAL_STOP)?;
        clear_stale_frames(&mut channel);

        channel.send_msg(MsgId::GetStaticId, &[])?;
        let static_id = match channel.recv_msg(MsgId::GetStaticId, 4) {
            Ok(reply) => u32::from_le_bytes(reply[..4].try_into().unwrap()),
            Err(_) => {
                debug!("Static id request unanswered, using fallback");
                STATIC_ID_FALLBACK
            }
        };

        let mut calibration = CalibrationRecord::default();
        channel.send_msg(MsgId::GetCalDataLength, &[])?;
        match channel.recv_msg(MsgId::GetCalDataLength, 4) {
            Ok(reply) => {
                let len = u32::from_le_bytes(reply[..4].try_into().unwrap());
                if let Some(blob) = channel.download_calibration_blob(len) {
                    calibration.apply_device_json(&blob);
                    info!(len, "Device calibration installed");
                }
            }
            Err(_) => debug!("Calibration length request unanswered, keeping defaults"),
        }

        channel.send_signal(MsgId::StartImuData, SIGNAL_START)?;

        info!(
            static_id = format!("{static_id:#010x}"),
            product_id = format!("{product_id:#06x}"),
            sample_rate = config.sample_rate,
            "IMU session open"
        );

        Ok(Self {
            channel,
            vendor_id: XREAL_VENDOR_ID,
            product_id,
            static_id,
            config,
            calibration,
            iron: IronOffsetEstimator::default(),
            ahrs: Ahrs::with_settings(config.ahrs_settings()),
            gyro_drift: Offset::new(OffsetSettings::default(), config.sample_rate as f32),
            last_timestamp: None,
            temperature: 0.0,
            callback,
        })
    }

    /// One streaming read with `timeout_ms`. Returns without an event when
    /// the timeout expires; dispatches INIT or UPDATE through the callback
    /// for accepted frames.
    pub fn read(&mut self, timeout_ms: i32) -> Result<()> {
        let mut buf = [0u8; SAMPLE_FRAME_SIZE];
        let n = self
            .channel
            .transport_mut()
            .read_timeout(&mut buf, timeout_ms)
            .map_err(|e| {
                error!(%e, "Transport read failed; device may be unplugged");
                ImuError::Unplugged
            })?;

        if n == 0 {
            return Ok(());
        }
        if n != SAMPLE_FRAME_SIZE {
            return Err(ImuError::UnexpectedSize(n));
        }

        let frame = RawSampleFrame::parse(&buf);

        if frame.is_init() {
            trace!(timestamp = frame.timestamp, "Stream init marker");
            self.dispatch(frame.timestamp, ImuEvent::Init);
            return Ok(());
        }

        if !frame.is_data() {
            warn!(signature = ?frame.signature, "Dropping frame with unknown signature");
            return Err(ImuError::WrongSignature);
        }

        self.process_data_frame(&frame)
    }

    fn process_data_frame(&mut self, frame: &RawSampleFrame) -> Result<()> {
        // The first accepted frame only establishes the baseline; a delta
        // against an unset baseline would integrate a garbage interval.
        let delta_time = match self.last_timestamp {
            Some(previous) => (frame.timestamp.wrapping_sub(previous) as f64 / 1e9) as f32,
            None => 0.0,
        };
        self.last_timestamp = Some(frame.timestamp);
        self.temperature = frame.temperature_celsius();

        let (gyroscope, accelerometer, magnetometer) = self.calibration.apply(
            &mut self.iron,
            frame.gyroscope(),
            frame.accelerometer(),
            frame.magnetometer(),
        );

        let gyroscope = self.gyro_drift.update(gyroscope);

        if !magnetometer.iter().all(|c| c.is_finite()) {
            trace!("Non-finite magnetometer reading");
        }
        // Magnetometer fusion measurably degrades orientation on this
        // hardware, so the magnetometer-free path is always taken; the
        // calibrated field stays available through the iron estimate.
        self.ahrs
            .update_no_magnetometer(gyroscope, accelerometer, delta_time);

        let orientation = self.ahrs.quaternion().into_inner().coords;
        if !orientation.iter().all(|c| c.is_finite()) {
            warn!("Fused orientation is non-finite, suppressing event");
            return Err(ImuError::InvalidFusedValue);
        }

        self.dispatch(frame.timestamp, ImuEvent::Update);
        Ok(())
    }

    /// Blocking stationary calibration.
    ///
    /// Consumes `iterations` valid data frames (frames with any other
    /// signature are skipped without counting) while the device rests on a
    /// stable surface. The mean gyroscope reading approximates its bias;
    /// accelerometer bias is estimated from consecutive-frame differences
    /// so the constant 1 g component drops out. On completion the selected
    /// per-sensor offsets are folded into the calibration record; the iron
    /// estimate overwrites the persisted values unconditionally when
    /// `magnet` is set.
    pub fn calibrate(
        &mut self,
        iterations: u32,
        gyro: bool,
        accel: bool,
        magnet: bool,
    ) -> Result<()> {
        let factor = if iterations > 0 {
            1.0 / iterations as f32
        } else {
            0.0
        };

        let mut gyro_sum = Vector3::zeros();
        let mut accel_diff_sum = Vector3::zeros();
        let mut previous_accel = Vector3::zeros();
        let mut initialized = false;

        let mut soft_iron = Matrix3::identity();
        let mut hard_iron = Vector3::zeros();

        let mut buf = [0u8; SAMPLE_FRAME_SIZE];
        let mut remaining = iterations;
        while remaining > 0 {
            let n = self
                .channel
                .transport_mut()
                .read(&mut buf)
                .map_err(|e| {
                    error!(%e, "Transport read failed; device may be unplugged");
                    ImuError::Unplugged
                })?;

            if n == 0 {
                continue;
            }
            if n != SAMPLE_FRAME_SIZE {
                return Err(ImuError::UnexpectedSize(n));
            }

            let frame = RawSampleFrame::parse(&buf);
            if !frame.is_data() {
                continue;
            }

            let g = remap_device_to_fusion(frame.gyroscope());
            let a = remap_device_to_fusion(frame.accelerometer());
            let m = remap_device_to_fusion(frame.magnetometer());

            if initialized {
                gyro_sum += g;
                accel_diff_sum += a - previous_accel;
            } else {
                gyro_sum = g;
                accel_diff_sum = Vector3::zeros();
                initialized = true;
            }
            previous_accel = a;

            (soft_iron, hard_iron) = self.iron.observe(&m);

            remaining -= 1;
        }

        if factor > 0.0 {
            if gyro {
                self.calibration.gyroscope.offset += gyro_sum * (factor * PI / 180.0);
            }
            if accel {
                self.calibration.accelerometer.offset += accel_diff_sum * (factor * GRAVITY_G);
            }
            if magnet {
                self.calibration.soft_iron_matrix = soft_iron;
                self.calibration.hard_iron_offset = hard_iron;
            }
            info!(iterations, gyro, accel, magnet, "Stationary calibration applied");
        }

        Ok(())
    }

    /// Discard up to 10 buffered stale frames.
    pub fn clear(&mut self) {
        clear_stale_frames(&mut self.channel);
    }

    /// Close the session, releasing the transport.
    pub fn close(self) -> Result<()> {
        info!(
            static_id = format!("{:#010x}", self.static_id),
            "IMU session closed"
        );
        drop(self);
        Ok(())
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn static_id(&self) -> u32 {
        self.static_id
    }

    /// Last die temperature seen, degrees Celsius.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn config(&self) -> &ImuConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationRecord {
        &self.calibration
    }

    /// Load a previously saved calibration record, replacing the current
    /// one only on success.
    pub fn load_calibration(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.calibration.load(path)
    }

    /// Persist the current calibration record.
    pub fn save_calibration(&self, path: impl AsRef<Path>) -> Result<()> {
        self.calibration.save(path)
    }

    fn dispatch(&mut self, timestamp: u64, event: ImuEvent) {
        if let Some(callback) = self.callback.as_mut() {
            callback(timestamp, event, FusionSnapshot { ahrs: &self.ahrs });
        }
    }
}

/// Bounded flush of frames left over from a previous stream.
fn clear_stale_frames<T: Transport>(channel: &mut Channel<T>) {
    let mut buf = [0u8; SAMPLE_FRAME_SIZE];
    for discarded in 0..CLEAR_MAX_FRAMES {
        match channel.transport_mut().read_timeout(&mut buf, CLEAR_TIMEOUT_MS) {
            Ok(0) | Err(_) => {
                if discarded > 0 {
                    debug!(discarded, "Discarded stale frames");
                }
                return;
            }
            Ok(_) => continue,
        }
    }
    debug!(discarded = CLEAR_MAX_FRAMES, "Discarded stale frames");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use crate::sample::tests::build_frame;
    use crate::sample::{DATA_SIGNATURE, INIT_SIGNATURE};
    use crate::transport::mock::MockTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    const CAL_JSON: &[u8] = br#"{"IMU":{"device_1":{
        "accel_bias":[0.1,0.2,0.3],
        "accel_q_gyro":[0.0,0.0,0.0,1.0],
        "gyro_bias":[0.01,0.02,0.03],
        "gyro_q_mag":[0.0,0.0,0.0,1.0],
        "mag_bias":[1.0,2.0,3.0],
        "imu_noises":[0.5,0.6,0.7,0.8],
        "scale_accel":[1.0,1.0,1.0],
        "scale_gyro":[1.0,1.0,1.0],
        "scale_mag":[1.0,1.0,1.0]}}}"#;

    /// Script the transport replies for a successful open sequence.
    fn scripted_open_transport(calibration_json: &[u8]) -> MockTransport {
        let mut transport = MockTransport::default();
        // Clear loop ends on its first timeout.
        transport.push_timeout();
        transport.push_read(
            Frame::encode(MsgId::GetStaticId as u8, &0xdeadbeefu32.to_le_bytes()).unwrap(),
        );
        transport.push_read(
            Frame::encode(
                MsgId::GetCalDataLength as u8,
                &(calibration_json.len() as u32).to_le_bytes(),
            )
            .unwrap(),
        );
        for chunk in calibration_json.chunks(56) {
            transport.push_read(Frame::encode(MsgId::CalDataGetNextSegment as u8, chunk).unwrap());
        }
        transport
    }

    fn open_scripted(callback: Option<ImuCallback>) -> ImuDevice<MockTransport> {
        ImuDevice::open_with(
            scripted_open_transport(CAL_JSON),
            0x0424,
            ImuConfig::default(),
            callback,
        )
        .unwrap()
    }

    #[test]
    fn open_installs_downloaded_calibration() {
        let device = open_scripted(None);

        assert_eq!(device.static_id(), 0xdeadbeef);
        assert_eq!(device.product_id(), 0x0424);

        let cal = device.calibration();
        assert!((cal.gyroscope.offset.x - 0.01).abs() < 1e-6);
        assert!((cal.gyroscope.offset.y - 0.02).abs() < 1e-6);
        assert!((cal.gyroscope.offset.z - 0.03).abs() < 1e-6);
        assert!((cal.accelerometer.offset.x - 0.1).abs() < 1e-6);
        assert!((cal.magnetometer.offset.z - 3.0).abs() < 1e-6);
        assert_eq!(cal.noises, [0.5, 0.6, 0.7, 0.8]);
    }

    #[test]
    fn open_sends_stop_then_start_signals() {
        let mut device = open_scripted(None);
        let writes = device.channel.transport_mut().writes.clone();

        // stop, static id, cal length, one segment request per chunk, start
        let segments = CAL_JSON.chunks(56).count();
        assert_eq!(writes.len(), 4 + segments);

        let first = Frame::decode(&writes[0]).unwrap();
        assert_eq!(first.msgid, MsgId::StartImuData as u8);
        assert_eq!(first.data, vec![SIGNAL_STOP]);

        let last = Frame::decode(writes.last().unwrap()).unwrap();
        assert_eq!(last.msgid, MsgId::StartImuData as u8);
        assert_eq!(last.data, vec![SIGNAL_START]);
    }

    #[test]
    fn open_keeps_defaults_when_download_aborts() {
        let mut transport = MockTransport::default();
        transport.push_timeout();
        transport
            .push_read(Frame::encode(MsgId::GetStaticId as u8, &[1, 0, 0, 0]).unwrap());
        transport.push_read(
            Frame::encode(MsgId::GetCalDataLength as u8, &130u32.to_le_bytes()).unwrap(),
        );
        // First segment only; the download aborts on the missing second one.
        transport.push_read(Frame::encode(MsgId::CalDataGetNextSegment as u8, &[0u8; 56]).unwrap());

        let device =
            ImuDevice::open_with(transport, 0x0424, ImuConfig::default(), None).unwrap();
        assert_eq!(*device.calibration(), CalibrationRecord::default());
    }

    #[test]
    fn open_fails_when_stop_signal_rejected() {
        let transport = MockTransport {
            short_write: true,
            ..Default::default()
        };
        assert!(matches!(
            ImuDevice::open_with(transport, 0x0424, ImuConfig::default(), None),
            Err(ImuError::PayloadSendFailed)
        ));
    }

    #[test]
    fn open_falls_back_on_truncated_static_id_reply() {
        // A full-size transfer whose frame claims an empty payload must not
        // reach the id parse; it fails the exchange and the fallback is used.
        let mut short_reply = Frame::encode(MsgId::GetStaticId as u8, &[]).unwrap();
        short_reply.resize(5 + 3 + 4, 0);

        let mut transport = MockTransport::default();
        transport.push_timeout(); // clear
        transport.push_read(short_reply);
        transport.push_timeout(); // calibration length reply never arrives

        let device =
            ImuDevice::open_with(transport, 0x0424, ImuConfig::default(), None).unwrap();
        assert_eq!(device.static_id(), STATIC_ID_FALLBACK);
    }

    #[test]
    fn open_uses_fallback_static_id() {
        let mut transport = MockTransport::default();
        transport.push_timeout(); // clear
        transport.push_timeout(); // static id reply never arrives
        transport.push_timeout(); // calibration length reply never arrives

        let device =
            ImuDevice::open_with(transport, 0x0424, ImuConfig::default(), None).unwrap();
        assert_eq!(device.static_id(), STATIC_ID_FALLBACK);
    }

    fn data_frame(timestamp: u64) -> [u8; SAMPLE_FRAME_SIZE] {
        build_frame(
            DATA_SIGNATURE,
            timestamp,
            1325, // ~35 degC
            ([100, 200, 300], 1, 1000),
            ([0, 0, 4096], 1, 4096),
            ([50, 60, 70], 1, 100),
        )
    }

    fn event_recorder() -> (Rc<RefCell<Vec<(u64, ImuEvent)>>>, ImuCallback) {
        let events: Rc<RefCell<Vec<(u64, ImuEvent)>>> = Rc::default();
        let sink = events.clone();
        let callback: ImuCallback = Box::new(move |timestamp, event, snapshot| {
            // The snapshot must be readable during the callback.
            let q = snapshot.orientation();
            assert!(q.x.is_finite());
            sink.borrow_mut().push((timestamp, event));
        });
        (events, callback)
    }

    #[test]
    fn read_timeout_is_benign_noop() {
        let (events, callback) = event_recorder();
        let mut device = open_scripted(Some(callback));
        device.channel.transport_mut().push_timeout();

        device.read(100).unwrap();
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn read_dispatches_init_event_without_fusion_work() {
        let (events, callback) = event_recorder();
        let mut device = open_scripted(Some(callback));
        device.channel.transport_mut().push_read(
            build_frame(INIT_SIGNATURE, 77, 0, ([0; 3], 0, 1), ([0; 3], 0, 1), ([0; 3], 0, 1))
                .to_vec(),
        );

        device.read(100).unwrap();
        assert_eq!(*events.borrow(), vec![(77, ImuEvent::Init)]);
        // Init frames do not set the delta-time baseline.
        assert_eq!(device.last_timestamp, None);
    }

    #[test]
    fn read_dispatches_update_for_data_frame() {
        let (events, callback) = event_recorder();
        let mut device = open_scripted(Some(callback));
        device
            .channel
            .transport_mut()
            .push_read(data_frame(1_000_000).to_vec());
        device
            .channel
            .transport_mut()
            .push_read(data_frame(2_000_000).to_vec());

        device.read(100).unwrap();
        device.read(100).unwrap();
        assert_eq!(
            *events.borrow(),
            vec![(1_000_000, ImuEvent::Update), (2_000_000, ImuEvent::Update)]
        );
        assert_eq!(device.last_timestamp, Some(2_000_000));
        assert!((device.temperature() - 35.0).abs() < 0.01);
    }

    #[test]
    fn read_with_nan_magnetometer_still_updates() {
        let (events, callback) = event_recorder();
        let mut device = open_scripted(Some(callback));
        // A zero magnetometer divisor makes every axis non-finite.
        let frame = build_frame(
            DATA_SIGNATURE,
            5_000_000,
            0,
            ([100, 200, 300], 1, 1000),
            ([0, 0, 4096], 1, 4096),
            ([50, 60, 70], 1, 0),
        );
        device.channel.transport_mut().push_read(frame.to_vec());

        device.read(100).unwrap();
        assert_eq!(*events.borrow(), vec![(5_000_000, ImuEvent::Update)]);
    }

    #[test]
    fn read_rejects_unknown_signature() {
        let (events, callback) = event_recorder();
        let mut device = open_scripted(Some(callback));
        let frame = build_frame(
            [0x99, 0x99],
            0,
            0,
            ([0; 3], 0, 1),
            ([0; 3], 0, 1),
            ([0; 3], 0, 1),
        );
        device.channel.transport_mut().push_read(frame.to_vec());

        assert!(matches!(device.read(100), Err(ImuError::WrongSignature)));
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn read_rejects_short_transfer() {
        let mut device = open_scripted(None);
        device.channel.transport_mut().push_read(vec![0u8; 32]);
        assert!(matches!(device.read(100), Err(ImuError::UnexpectedSize(32))));
    }

    #[test]
    fn read_reports_unplugged_on_hard_error() {
        let mut device = open_scripted(None);
        device.channel.transport_mut().push_hard_error();
        assert!(matches!(device.read(100), Err(ImuError::Unplugged)));
    }

    #[test]
    fn calibrate_accumulates_gyro_bias() {
        let mut device = open_scripted(None);
        let gyro_before = device.calibration().gyroscope.offset;
        let accel_before = device.calibration().accelerometer.offset;

        // Three identical stationary frames; non-data frames are skipped.
        let frame = build_frame(
            DATA_SIGNATURE,
            0,
            0,
            ([2000, -2000, 1000], 1, 1000),
            ([0, 0, 4096], 1, 4096),
            ([50, 60, 70], 1, 100),
        );
        device.channel.transport_mut().push_read(
            build_frame(INIT_SIGNATURE, 0, 0, ([0; 3], 0, 1), ([0; 3], 0, 1), ([0; 3], 0, 1))
                .to_vec(),
        );
        for _ in 0..3 {
            device.channel.transport_mut().push_read(frame.to_vec());
        }

        device.calibrate(3, true, true, false).unwrap();

        // Device gyro (2, -2, 1) deg/s remaps to (-2, -1, 2) in the fusion
        // frame; the mean bias is converted to rad/s before persisting.
        let added = device.calibration().gyroscope.offset - gyro_before;
        let deg_to_rad = PI / 180.0;
        assert!((added.x - -2.0 * deg_to_rad).abs() < 1e-6);
        assert!((added.y - -1.0 * deg_to_rad).abs() < 1e-6);
        assert!((added.z - 2.0 * deg_to_rad).abs() < 1e-6);

        // A constant accelerometer reading has zero consecutive differences,
        // so the offset installed at open time is unchanged.
        let accel_added = device.calibration().accelerometer.offset - accel_before;
        assert!(accel_added.norm() < 1e-6);
    }

    #[test]
    fn calibrate_zero_iterations_changes_nothing() {
        let mut device = open_scripted(None);
        let before = device.calibration().clone();
        device.calibrate(0, true, true, true).unwrap();
        assert_eq!(*device.calibration(), before);
    }

    #[test]
    fn calibrate_reports_unplugged_on_hard_error() {
        let mut device = open_scripted(None);
        device.channel.transport_mut().push_hard_error();
        assert!(matches!(
            device.calibrate(3, true, false, false),
            Err(ImuError::Unplugged)
        ));
    }
}
