// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Payload validation for FuseMod control messages

use crate::messages::*;
use thiserror::Error;

/// Validation error for a frame payload that passed framing checks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown message type {0}")]
    UnknownType(u16),
    #[error("message type {0} requires a non-empty path")]
    EmptyPath(u16),
    #[error("payload of {actual} bytes is shorter than the {needed}-byte fixed layout")]
    Truncated { needed: usize, actual: usize },
    #[error("payload is {actual} bytes but its fields declare {declared}")]
    LengthMismatch { declared: usize, actual: usize },
}

impl ValidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::UnknownType(_) => ErrorCode::InvalidType,
            ValidationError::EmptyPath(_) => ErrorCode::InvalidPath,
            ValidationError::Truncated { .. } | ValidationError::LengthMismatch { .. } => {
                ErrorCode::InvalidPacket
            }
        }
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Parse and validate an inbound command payload against its layout.
pub fn parse_command(msg_type: u16, payload: &[u8]) -> Result<Command<'_>, ValidationError> {
    let kind = MessageType::try_from(msg_type).map_err(|_| ValidationError::UnknownType(msg_type))?;

    match kind {
        MessageType::MakeDir | MessageType::RemoveDir | MessageType::RemoveFile => {
            if payload.is_empty() {
                return Err(ValidationError::EmptyPath(msg_type));
            }
            let path = payload;
            Ok(match kind {
                MessageType::MakeDir => Command::MakeDir { path },
                MessageType::RemoveDir => Command::RemoveDir { path },
                _ => Command::RemoveFile { path },
            })
        }
        MessageType::MakeFile => {
            if payload.len() < 6 {
                return Err(ValidationError::Truncated {
                    needed: 6,
                    actual: payload.len(),
                });
            }
            let flags = CapabilityFlags::from_wire(read_u32(payload, 0));
            let path_len = read_u16(payload, 4) as usize;
            if 6 + path_len != payload.len() {
                return Err(ValidationError::LengthMismatch {
                    declared: 6 + path_len,
                    actual: payload.len(),
                });
            }
            Ok(Command::MakeFile {
                flags,
                path: &payload[6..],
            })
        }
        MessageType::SetContent | MessageType::AppendContent => {
            let (path, content) = parse_path_and_content(payload)?;
            Ok(if kind == MessageType::SetContent {
                Command::SetContent { path, content }
            } else {
                Command::AppendContent { path, content }
            })
        }
        MessageType::WriteNotify => Ok(Command::NotifyEcho),
    }
}

/// `u16 path_len, path, u16 content_len, content`, with no trailing bytes.
fn parse_path_and_content(payload: &[u8]) -> Result<(&[u8], &[u8]), ValidationError> {
    if payload.len() < 4 {
        return Err(ValidationError::Truncated {
            needed: 4,
            actual: payload.len(),
        });
    }
    let path_len = read_u16(payload, 0) as usize;
    if 4 + path_len > payload.len() {
        return Err(ValidationError::Truncated {
            needed: 4 + path_len,
            actual: payload.len(),
        });
    }
    let content_len = read_u16(payload, 2 + path_len) as usize;
    let declared = 4 + path_len + content_len;
    if declared != payload.len() {
        return Err(ValidationError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    let path = &payload[2..2 + path_len];
    let content = &payload[4 + path_len..];
    Ok((path, content))
}

/// Parse a write notification payload:
/// `u16 path_len, path, u16 content_len, content, u32 offset`.
pub fn parse_notification(payload: &[u8]) -> Result<WriteNotification, ValidationError> {
    if payload.len() < 8 {
        return Err(ValidationError::Truncated {
            needed: 8,
            actual: payload.len(),
        });
    }
    let path_len = read_u16(payload, 0) as usize;
    if 8 + path_len > payload.len() {
        return Err(ValidationError::Truncated {
            needed: 8 + path_len,
            actual: payload.len(),
        });
    }
    let content_len = read_u16(payload, 2 + path_len) as usize;
    let declared = 8 + path_len + content_len;
    if declared != payload.len() {
        return Err(ValidationError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    let content_start = 4 + path_len;
    Ok(WriteNotification {
        path: payload[2..2 + path_len].to_vec(),
        content: payload[content_start..content_start + content_len].to_vec(),
        offset: read_u32(payload, content_start + content_len),
    })
}

/// Parse a response payload into its status byte.
pub fn parse_status(payload: &[u8]) -> Result<u8, ValidationError> {
    match payload {
        [status] => Ok(*status),
        _ => Err(ValidationError::LengthMismatch {
            declared: 1,
            actual: payload.len(),
        }),
    }
}
