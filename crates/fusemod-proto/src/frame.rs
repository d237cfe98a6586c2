// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Frame codec for the FuseMod control channel
//!
//! Every message on either control stream is one frame:
//!
//! ```text
//! offset 0..2     header magic (request 54 32, response/notification 54 02)
//! offset 2..4     message type, u16 LE
//! offset 4..6     payload length N, u16 LE
//! offset 6..6+N   payload
//! offset 6+N..+2  CRC16/CCITT over bytes [0, 6+N), u16 LE
//! offset 8+N..+2  trailer magic 23 45
//! ```
//!
//! The two header magics differ in their second byte so that producer and
//! consumer roles can be told apart on the wire.

use std::io::{self, Read};

use tracing::debug;

use crate::messages::ErrorCode;

pub const REQUEST_MAGIC: [u8; 2] = [0x54, 0x32];
pub const RESPONSE_MAGIC: [u8; 2] = [0x54, 0x02];
pub const TRAILER_MAGIC: [u8; 2] = [0x23, 0x45];

/// Magic + type + payload length
pub const HEADER_LEN: usize = 6;
/// Header, CRC and trailer: the size of a frame with an empty payload
pub const FRAME_OVERHEAD: usize = 10;
pub const MAX_FRAME_SIZE: usize = 3072;
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;

/// Which side produced a frame; selects the header magic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameRole {
    /// Controller to filesystem
    Request,
    /// Filesystem to controller (responses and write notifications)
    Response,
}

impl FrameRole {
    pub fn magic(self) -> [u8; 2] {
        match self {
            FrameRole::Request => REQUEST_MAGIC,
            FrameRole::Response => RESPONSE_MAGIC,
        }
    }
}

/// Frame codec error
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("bad header magic {0:02x?}")]
    BadMagic([u8; 2]),
    #[error("bad trailer magic {0:02x?}")]
    BadTrailer([u8; 2]),
    #[error("frame is {actual} bytes but its header declares {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("frame of {0} bytes exceeds the 3072-byte limit")]
    TooLarge(usize),
    #[error("crc mismatch: frame carries {carried:#06x}, computed {computed:#06x}")]
    CrcMismatch { carried: u16, computed: u16 },
    #[error("truncated frame: wanted {expected} bytes, stream ended after {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Status code reported to the peer for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            FrameError::CrcMismatch { .. } => ErrorCode::CrcMismatch,
            FrameError::Io(_) => ErrorCode::IoError,
            _ => ErrorCode::InvalidPacket,
        }
    }
}

/// Decoded fixed header fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u16,
    pub payload_len: u16,
}

impl FrameHeader {
    /// Total size of the frame this header announces
    pub fn frame_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload_len as usize
    }
}

/// One complete, validated frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u16,
    pub payload: Vec<u8>,
}

/// CRC16/CCITT: polynomial 0x1021, initial value 0, MSB-first, no final xor.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Decode the header of an inbound (request) frame.
///
/// Only the leading magic is validated; the declared payload length is not
/// checked against anything.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, FrameError> {
    decode_header_as(FrameRole::Request, bytes)
}

pub fn decode_header_as(role: FrameRole, bytes: &[u8]) -> Result<FrameHeader, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::TooShort { len: bytes.len() });
    }
    let magic = [bytes[0], bytes[1]];
    if magic != role.magic() {
        return Err(FrameError::BadMagic(magic));
    }
    Ok(FrameHeader {
        msg_type: u16::from_le_bytes([bytes[2], bytes[3]]),
        payload_len: u16::from_le_bytes([bytes[4], bytes[5]]),
    })
}

/// Validate a fully collected frame and return its payload.
///
/// Checks the trailer magic, that the frame is exactly as long as
/// `payload_len` implies, and the CRC over everything before the CRC field.
pub fn decode_and_validate(frame: &[u8], payload_len: u16) -> Result<&[u8], FrameError> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(FrameError::TooShort { len: frame.len() });
    }

    let size = frame.len();
    let trailer = [frame[size - 2], frame[size - 1]];
    if trailer != TRAILER_MAGIC {
        return Err(FrameError::BadTrailer(trailer));
    }

    let expected = FRAME_OVERHEAD + payload_len as usize;
    if size != expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: size,
        });
    }

    let carried = u16::from_le_bytes([frame[size - 4], frame[size - 3]]);
    let computed = crc16_ccitt(&frame[..size - 4]);
    if carried != computed {
        return Err(FrameError::CrcMismatch { carried, computed });
    }

    Ok(&frame[HEADER_LEN..HEADER_LEN + payload_len as usize])
}

/// Build an outbound (response or notification) frame.
pub fn encode(msg_type: u16, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    encode_as(FrameRole::Response, msg_type, payload)
}

/// Build an inbound (request) frame, as the controller does.
pub fn encode_request(msg_type: u16, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    encode_as(FrameRole::Request, msg_type, payload)
}

pub fn encode_as(role: FrameRole, msg_type: u16, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let total = FRAME_OVERHEAD + payload.len();
    if total > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(total));
    }

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&role.magic());
    frame.extend_from_slice(&msg_type.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = crc16_ccitt(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&TRAILER_MAGIC);
    Ok(frame)
}

/// Reads whole frames from a byte stream.
///
/// A frame is collected the way the wire is laid out: first the fixed
/// ten-byte skeleton size, then the rest of the declared payload.
pub struct FrameReader<R> {
    inner: R,
    role: FrameRole,
    last_msg_type: Option<u16>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, role: FrameRole) -> Self {
        Self {
            inner,
            role,
            last_msg_type: None,
        }
    }

    /// Message type of the frame being read by the last `read_frame` call,
    /// if its header decoded
    pub fn last_msg_type(&self) -> Option<u16> {
        self.last_msg_type
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        self.last_msg_type = None;
        let mut buf = vec![0u8; FRAME_OVERHEAD];
        let got = read_full(&mut self.inner, &mut buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got != FRAME_OVERHEAD {
            return Err(FrameError::Truncated {
                expected: FRAME_OVERHEAD,
                actual: got,
            });
        }

        let header = decode_header_as(self.role, &buf)?;
        self.last_msg_type = Some(header.msg_type);

        let frame_len = header.frame_len();
        if frame_len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(frame_len));
        }

        buf.resize(frame_len, 0);
        let rest = read_full(&mut self.inner, &mut buf[FRAME_OVERHEAD..])?;
        if rest != header.payload_len as usize {
            return Err(FrameError::Truncated {
                expected: frame_len,
                actual: FRAME_OVERHEAD + rest,
            });
        }

        debug!(
            target: "fusemod::frame",
            msg_type = header.msg_type,
            frame = %hex::encode(&buf),
            "received frame"
        );

        let payload = decode_and_validate(&buf, header.payload_len)?;
        Ok(Some(Frame {
            msg_type: header.msg_type,
            payload: payload.to_vec(),
        }))
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
/// Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
