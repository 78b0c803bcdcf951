//! Checksummed request/response framing.
//!
//! Every control exchange with the device is a fixed-layout frame inside a
//! single 64-byte HID transfer:
//!
//! ```text
//! head (0xAA) | checksum u32 LE | length u16 LE | msgid u8 | data (<= 56)
//! ```
//!
//! `length` counts `msgid` plus the data, plus its own two bytes; the
//! checksum covers exactly that `length`-sized region. Frames never span
//! transfers — oversized payloads are rejected here, and the only large
//! payload in the protocol (the calibration blob) is fragmented one level
//! up as a sequence of bounded request/response round trips.
//!
//! A reply whose message id does not match the request is discarded whole
//! and the exchange fails; no resynchronization is attempted. A single
//! corrupted frame can therefore desynchronize the session until the next
//! successful round trip, which is a deliberate simplicity trade-off.

use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::{debug, trace, warn};

use crate::error::{ImuError, Result};
use crate::transport::{Transport, MAX_TRANSFER_SIZE};

/// First byte of every control frame.
pub const FRAME_HEAD: u8 = 0xAA;

/// Longest payload that fits a frame within one 64-byte transfer.
pub const MAX_PAYLOAD_LEN: usize = 56;

/// head + checksum + length fields preceding `msgid`.
const FRAME_OVERHEAD: usize = 5;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Control message ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgId {
    /// Request the total length of the calibration blob (4-byte LE reply).
    GetCalDataLength = 0x14,
    /// Request the next segment of the calibration blob.
    CalDataGetNextSegment = 0x15,
    /// Start (signal 1) or stop (signal 0) the sensor stream.
    StartImuData = 0x19,
    /// Request the device's static id (4-byte LE reply).
    GetStaticId = 0x1a,
}

/// A parsed control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub checksum: u32,
    pub msgid: u8,
    pub data: Vec<u8>,
}

impl Frame {
    /// Checksum over the `length ++ msgid ++ data` region of a frame.
    pub fn checksum_of(msgid: u8, data: &[u8]) -> u32 {
        let length = (3 + data.len()) as u16;
        let mut digest = CRC32.digest();
        digest.update(&length.to_le_bytes());
        digest.update(&[msgid]);
        digest.update(data);
        digest.finalize()
    }

    /// Encode a frame for the wire. Fails with [`ImuError::WrongFrameSize`]
    /// if the payload does not fit a single transfer.
    pub fn encode(msgid: u8, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(ImuError::WrongFrameSize);
        }

        let length = (3 + data.len()) as u16;
        let mut bytes = Vec::with_capacity(FRAME_OVERHEAD + length as usize);
        bytes.push(FRAME_HEAD);
        bytes.extend_from_slice(&Self::checksum_of(msgid, data).to_le_bytes());
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes.push(msgid);
        bytes.extend_from_slice(data);
        Ok(bytes)
    }

    /// Decode a frame from `bytes`, which must hold the complete on-wire
    /// frame (`5 + length` bytes).
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < FRAME_OVERHEAD + 3 || bytes[0] != FRAME_HEAD {
            return Err(ImuError::PayloadRecvFailed);
        }

        let checksum = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let length = u16::from_le_bytes([bytes[5], bytes[6]]) as usize;
        if length < 3 || bytes.len() < FRAME_OVERHEAD + length {
            return Err(ImuError::PayloadRecvFailed);
        }

        let msgid = bytes[7];
        let data = bytes[8..FRAME_OVERHEAD + length].to_vec();

        // The reference driver never rejects a frame on checksum grounds;
        // report a mismatch but keep the frame.
        if checksum != Self::checksum_of(msgid, &data) {
            warn!(msgid, "Frame checksum mismatch");
        }

        Ok(Frame {
            checksum,
            msgid,
            data,
        })
    }
}

/// Synchronous request/response channel over a [`Transport`].
pub struct Channel<T: Transport> {
    transport: T,
}

impl<T: Transport> Channel<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send one control frame. Fails if the transport accepts fewer bytes
    /// than the frame holds.
    pub fn send_msg(&mut self, msgid: MsgId, data: &[u8]) -> Result<()> {
        let bytes = Frame::encode(msgid as u8, data)?;
        trace!(?msgid, len = bytes.len(), "Sending control frame");

        let written = self
            .transport
            .write(&bytes)
            .map_err(|_| ImuError::PayloadSendFailed)?;
        if written != bytes.len() {
            debug!(?msgid, written, expected = bytes.len(), "Short write");
            return Err(ImuError::PayloadSendFailed);
        }
        Ok(())
    }

    /// Send a one-byte signal message.
    pub fn send_signal(&mut self, msgid: MsgId, signal: u8) -> Result<()> {
        self.send_msg(msgid, &[signal])
    }

    /// Receive the reply to `msgid` with exactly `len` payload bytes.
    ///
    /// Blocks until a transfer arrives. Any reply with a different message
    /// id, or of the wrong size, fails the exchange and is discarded.
    pub fn recv_msg(&mut self, msgid: MsgId, len: usize) -> Result<Vec<u8>> {
        let expected = FRAME_OVERHEAD + 3 + len;
        debug_assert!(expected <= MAX_TRANSFER_SIZE);

        let mut buf = [0u8; MAX_TRANSFER_SIZE];
        let n = self
            .transport
            .read(&mut buf[..expected])
            .map_err(|_| ImuError::PayloadRecvFailed)?;
        if n == 0 || n < expected {
            return Err(ImuError::PayloadRecvFailed);
        }

        let frame = Frame::decode(&buf[..expected])?;
        if frame.msgid != msgid as u8 {
            debug!(
                got = frame.msgid,
                expected = msgid as u8,
                "Discarding reply with mismatched message id"
            );
            return Err(ImuError::PayloadRecvFailed);
        }
        // The frame's own length field may claim less than the transfer
        // carried; the caller asked for exactly `len` payload bytes.
        if frame.data.len() != len {
            debug!(
                got = frame.data.len(),
                expected = len,
                "Discarding reply with undersized payload"
            );
            return Err(ImuError::PayloadRecvFailed);
        }

        Ok(frame.data)
    }

    /// Request/response round trip with a fixed-size reply.
    pub fn request(&mut self, msgid: MsgId, len: usize) -> Result<Vec<u8>> {
        self.send_msg(msgid, &[])?;
        self.recv_msg(msgid, len)
    }

    /// Download the calibration blob of `total_len` bytes as a sequence of
    /// "next segment" round trips of at most 56 bytes each.
    ///
    /// Returns `None` if any segment exchange fails; the caller keeps its
    /// calibration defaults in that case.
    pub fn download_calibration_blob(&mut self, total_len: u32) -> Option<Vec<u8>> {
        let total = total_len as usize;
        let mut blob = Vec::with_capacity(total);

        while blob.len() < total {
            let next = (total - blob.len()).min(MAX_PAYLOAD_LEN);
            if self.send_msg(MsgId::CalDataGetNextSegment, &[]).is_err() {
                warn!(
                    received = blob.len(),
                    total, "Calibration download aborted on segment request"
                );
                return None;
            }
            match self.recv_msg(MsgId::CalDataGetNextSegment, next) {
                Ok(segment) => blob.extend_from_slice(&segment),
                Err(_) => {
                    warn!(
                        received = blob.len(),
                        total, "Calibration download aborted on segment reply"
                    );
                    return None;
                }
            }
        }

        debug!(len = blob.len(), "Calibration blob downloaded");
        Some(blob)
    }
}
