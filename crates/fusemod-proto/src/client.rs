// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Controller side of the control channel.
//!
//! The controller writes request frames into the filesystem's inbound
//! stream and reads response and write-notification frames from its
//! outbound stream. Every command is answered by exactly one response frame
//! of the same message type; write notifications may arrive at any point in
//! between and are buffered until the caller collects them.

use std::io::{self, Read, Write};

use tracing::debug;

use crate::frame::{
    encode_request, FrameError, FrameReader, FrameRole, FRAME_OVERHEAD, MAX_FRAME_SIZE,
};
use crate::messages::{
    CapabilityFlags, Command, ErrorCode, MessageType, WriteNotification, STATUS_OK,
};
use crate::validation::{parse_notification, parse_status, ValidationError};

/// Something the filesystem sent on its outbound stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Response { msg_type: u16, status: u8 },
    Write(WriteNotification),
}

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Payload(#[from] ValidationError),
    #[error("filesystem answered with status {raw} ({code:?})")]
    Status { raw: u8, code: Option<ErrorCode> },
    #[error("response for message type {got} while waiting for {expected}")]
    UnexpectedResponse { expected: u16, got: u16 },
    #[error("outbound stream closed")]
    Closed,
    #[error("path of {0} bytes leaves no room for content in a frame")]
    PathTooLong(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Protocol error code, when the filesystem reported one
    pub fn status_code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Status { code, .. } => *code,
            _ => None,
        }
    }
}

/// Content bytes a set/append frame can carry for this path length
pub fn content_capacity(path_len: usize) -> Result<usize, ClientError> {
    let overhead = FRAME_OVERHEAD + 4 + path_len;
    if overhead >= MAX_FRAME_SIZE {
        return Err(ClientError::PathTooLong(path_len));
    }
    Ok(MAX_FRAME_SIZE - overhead)
}

pub struct ControlClient<W, R> {
    writer: W,
    reader: FrameReader<R>,
    notifications: Vec<WriteNotification>,
}

impl<W: Write, R: Read> ControlClient<W, R> {
    /// `writer` feeds the filesystem's inbound stream, `reader` drains its
    /// outbound stream.
    pub fn new(writer: W, reader: R) -> Self {
        Self {
            writer,
            reader: FrameReader::new(reader, FrameRole::Response),
            notifications: Vec::new(),
        }
    }

    pub fn mkdir(&mut self, path: impl AsRef<[u8]>) -> Result<(), ClientError> {
        self.send(&Command::MakeDir {
            path: path.as_ref(),
        })
    }

    pub fn mkfile(
        &mut self,
        path: impl AsRef<[u8]>,
        flags: CapabilityFlags,
    ) -> Result<(), ClientError> {
        self.send(&Command::MakeFile {
            flags,
            path: path.as_ref(),
        })
    }

    pub fn rmdir(&mut self, path: impl AsRef<[u8]>) -> Result<(), ClientError> {
        self.send(&Command::RemoveDir {
            path: path.as_ref(),
        })
    }

    pub fn rmfile(&mut self, path: impl AsRef<[u8]>) -> Result<(), ClientError> {
        self.send(&Command::RemoveFile {
            path: path.as_ref(),
        })
    }

    pub fn set_content(
        &mut self,
        path: impl AsRef<[u8]>,
        content: impl AsRef<[u8]>,
    ) -> Result<(), ClientError> {
        self.send(&Command::SetContent {
            path: path.as_ref(),
            content: content.as_ref(),
        })
    }

    pub fn append_content(
        &mut self,
        path: impl AsRef<[u8]>,
        content: impl AsRef<[u8]>,
    ) -> Result<(), ClientError> {
        self.send(&Command::AppendContent {
            path: path.as_ref(),
            content: content.as_ref(),
        })
    }

    /// Replace a file's content with `data` of any size.
    ///
    /// The first frame-sized chunk is sent as set-content, the remainder as
    /// append-content commands in order.
    pub fn upload(&mut self, path: impl AsRef<[u8]>, data: &[u8]) -> Result<(), ClientError> {
        let path = path.as_ref();
        let chunk = content_capacity(path.len())?;
        let (first, rest) = data.split_at(chunk.min(data.len()));
        self.set_content(path, first)?;
        self.append_all(path, rest)
    }

    /// Append `data` of any size, one frame-sized chunk at a time.
    pub fn append_all(&mut self, path: impl AsRef<[u8]>, data: &[u8]) -> Result<(), ClientError> {
        let path = path.as_ref();
        let chunk = content_capacity(path.len())?;
        for piece in data.chunks(chunk) {
            self.append_content(path, piece)?;
        }
        Ok(())
    }

    /// Send one command and wait for its response.
    pub fn send(&mut self, command: &Command<'_>) -> Result<(), ClientError> {
        let msg_type = command.message_type().as_u16();
        let frame = encode_request(msg_type, &command.encode_payload())?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        debug!(
            target: "fusemod::client",
            msg_type,
            len = frame.len(),
            "sent request"
        );
        self.wait_response(msg_type)
    }

    fn wait_response(&mut self, expected: u16) -> Result<(), ClientError> {
        loop {
            match self.next_event()? {
                Event::Write(notification) => self.notifications.push(notification),
                Event::Response { msg_type, status } => {
                    if status != STATUS_OK {
                        return Err(ClientError::Status {
                            raw: status,
                            code: ErrorCode::from_u8(status),
                        });
                    }
                    if msg_type != expected {
                        return Err(ClientError::UnexpectedResponse {
                            expected,
                            got: msg_type,
                        });
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Read the next frame from the outbound stream and classify it.
    pub fn next_event(&mut self) -> Result<Event, ClientError> {
        let frame = self.reader.read_frame()?.ok_or(ClientError::Closed)?;
        if frame.msg_type == MessageType::WriteNotify.as_u16() {
            Ok(Event::Write(parse_notification(&frame.payload)?))
        } else {
            Ok(Event::Response {
                msg_type: frame.msg_type,
                status: parse_status(&frame.payload)?,
            })
        }
    }

    /// Write notifications received while waiting for responses
    pub fn take_notifications(&mut self) -> Vec<WriteNotification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn into_parts(self) -> (W, R) {
        (self.writer, self.reader.into_inner())
    }
}
