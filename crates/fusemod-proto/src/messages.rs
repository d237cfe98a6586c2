// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Control channel message types for FuseMod

use bitflags::bitflags;

use crate::frame::{FRAME_OVERHEAD, MAX_FRAME_SIZE};

/// Status byte carried by a successful response frame
pub const STATUS_OK: u8 = 0;

/// Error vocabulary shared by the codec, the tree store and the dispatcher.
///
/// The numeric values are part of the wire format: a failed response frame
/// carries exactly one of these bytes as its payload. Value 7 is unassigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u8)]
pub enum ErrorCode {
    #[error("invalid path")]
    InvalidPath = 1,
    #[error("already exists")]
    AlreadyExists = 2,
    #[error("not found")]
    NotFound = 3,
    #[error("invalid operation")]
    InvalidOperation = 4,
    #[error("io error")]
    IoError = 5,
    #[error("invalid packet")]
    InvalidPacket = 6,
    #[error("crc mismatch")]
    CrcMismatch = 8,
    #[error("invalid message type")]
    InvalidType = 9,
}

impl ErrorCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::InvalidPath),
            2 => Some(Self::AlreadyExists),
            3 => Some(Self::NotFound),
            4 => Some(Self::InvalidOperation),
            5 => Some(Self::IoError),
            6 => Some(Self::InvalidPacket),
            8 => Some(Self::CrcMismatch),
            9 => Some(Self::InvalidType),
            _ => None,
        }
    }
}

/// Message type field of a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    MakeDir = 1,
    MakeFile = 2,
    RemoveDir = 3,
    RemoveFile = 4,
    SetContent = 5,
    AppendContent = 6,
    /// Outbound write notification; echoed inbound it is a no-op
    WriteNotify = 7,
}

impl MessageType {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MessageType {
    type Error = ErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::MakeDir),
            2 => Ok(Self::MakeFile),
            3 => Ok(Self::RemoveDir),
            4 => Ok(Self::RemoveFile),
            5 => Ok(Self::SetContent),
            6 => Ok(Self::AppendContent),
            7 => Ok(Self::WriteNotify),
            _ => Err(ErrorCode::InvalidType),
        }
    }
}

bitflags! {
    /// Per-file capability bits, fixed when the file is created.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const COPY_ON_WRITE = 1 << 3;
    }
}

impl CapabilityFlags {
    /// Keep every bit the controller sent, known or not.
    pub fn from_wire(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }

    pub fn readable(&self) -> bool {
        self.contains(Self::READABLE)
    }

    pub fn writable(&self) -> bool {
        self.contains(Self::WRITABLE)
    }

    pub fn copy_on_write(&self) -> bool {
        self.contains(Self::COPY_ON_WRITE)
    }
}

/// A validated inbound command. Paths and contents borrow from the frame
/// payload and are exactly as long as declared on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    MakeDir { path: &'a [u8] },
    MakeFile { flags: CapabilityFlags, path: &'a [u8] },
    RemoveDir { path: &'a [u8] },
    RemoveFile { path: &'a [u8] },
    SetContent { path: &'a [u8], content: &'a [u8] },
    AppendContent { path: &'a [u8], content: &'a [u8] },
    NotifyEcho,
}

impl<'a> Command<'a> {
    pub fn message_type(&self) -> MessageType {
        match self {
            Command::MakeDir { .. } => MessageType::MakeDir,
            Command::MakeFile { .. } => MessageType::MakeFile,
            Command::RemoveDir { .. } => MessageType::RemoveDir,
            Command::RemoveFile { .. } => MessageType::RemoveFile,
            Command::SetContent { .. } => MessageType::SetContent,
            Command::AppendContent { .. } => MessageType::AppendContent,
            Command::NotifyEcho => MessageType::WriteNotify,
        }
    }

    /// Target path of the command, if it has one
    pub fn path(&self) -> Option<&'a [u8]> {
        match self {
            Command::MakeDir { path }
            | Command::MakeFile { path, .. }
            | Command::RemoveDir { path }
            | Command::RemoveFile { path }
            | Command::SetContent { path, .. }
            | Command::AppendContent { path, .. } => Some(*path),
            Command::NotifyEcho => None,
        }
    }

    /// Serialize the command payload (without framing).
    ///
    /// Lengths are written as u16; callers keep paths and contents within a
    /// single frame, which `encode_request` enforces.
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Command::MakeDir { path }
            | Command::RemoveDir { path }
            | Command::RemoveFile { path } => path.to_vec(),
            Command::MakeFile { flags, path } => {
                let mut out = Vec::with_capacity(6 + path.len());
                out.extend_from_slice(&flags.bits().to_le_bytes());
                out.extend_from_slice(&(path.len() as u16).to_le_bytes());
                out.extend_from_slice(path);
                out
            }
            Command::SetContent { path, content } | Command::AppendContent { path, content } => {
                let mut out = Vec::with_capacity(4 + path.len() + content.len());
                out.extend_from_slice(&(path.len() as u16).to_le_bytes());
                out.extend_from_slice(path);
                out.extend_from_slice(&(content.len() as u16).to_le_bytes());
                out.extend_from_slice(content);
                out
            }
            Command::NotifyEcho => Vec::new(),
        }
    }
}

/// Payload of an outbound write notification (message type 7)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteNotification {
    pub path: Vec<u8>,
    pub content: Vec<u8>,
    /// Absolute file offset of the first content byte
    pub offset: u32,
}

impl WriteNotification {
    /// Bytes a notification frame needs besides its content:
    /// frame skeleton, path length, path, content length and offset.
    pub fn fixed_overhead(path_len: usize) -> usize {
        FRAME_OVERHEAD + 2 + path_len + 2 + 4
    }

    /// Largest content slice that fits a single frame for this path length,
    /// or `None` when the path alone fills the frame.
    pub fn max_chunk(path_len: usize) -> Option<usize> {
        let overhead = Self::fixed_overhead(path_len);
        if overhead >= MAX_FRAME_SIZE {
            None
        } else {
            Some(MAX_FRAME_SIZE - overhead)
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.path.len() + self.content.len());
        out.extend_from_slice(&(self.path.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.path);
        out.extend_from_slice(&(self.content.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.content);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out
    }

    /// End offset (exclusive) of the notified range
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.content.len() as u64
    }
}
