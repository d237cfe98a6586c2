// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Write notifications to the controller

use fusemod_proto::{FrameError, MessageType, WriteNotification};
use tracing::debug;

use crate::context::FuseModContext;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("path of {0} bytes does not fit a notification frame")]
    PathTooLong(usize),
    #[error("write range ending at {0} is beyond the 32-bit notification offset")]
    OffsetOutOfRange(u64),
    #[error(transparent)]
    Send(#[from] FrameError),
}

/// Split a write into notification payloads that each fit one frame,
/// in ascending offset order.
pub fn chunk_write(
    path: &[u8],
    data: &[u8],
    offset: u64,
) -> Result<Vec<WriteNotification>, NotifyError> {
    let chunk =
        WriteNotification::max_chunk(path.len()).ok_or(NotifyError::PathTooLong(path.len()))?;
    let end = offset + data.len() as u64;
    if end > u32::MAX as u64 {
        return Err(NotifyError::OffsetOutOfRange(end));
    }

    let mut notifications = Vec::with_capacity(data.len().div_ceil(chunk));
    let mut at = offset;
    for piece in data.chunks(chunk) {
        notifications.push(WriteNotification {
            path: path.to_vec(),
            content: piece.to_vec(),
            offset: at as u32,
        });
        at += piece.len() as u64;
    }
    Ok(notifications)
}

/// Send a kernel write to the controller as one or more notification frames.
pub fn notify_write(
    ctx: &FuseModContext,
    path: &[u8],
    data: &[u8],
    offset: u64,
) -> Result<(), NotifyError> {
    let notifications = chunk_write(path, data, offset)?;
    let frames = notifications.len();
    for notification in notifications {
        ctx.send_frame(MessageType::WriteNotify.as_u16(), &notification.encode_payload())?;
    }
    debug!(
        target: "fusemod::notify",
        path = %String::from_utf8_lossy(path),
        offset,
        len = data.len(),
        frames,
        "notified write"
    );
    Ok(())
}
