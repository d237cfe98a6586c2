// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Control channel command loop
//!
//! Reads request frames from the inbound stream one at a time, applies each
//! command to the tree and answers with a single status frame of the same
//! message type. The first failure of any kind ends the loop: after the
//! failing response has been sent the loop returns
//! [`DispatchOutcome::Fatal`] and leaves the shutdown to its owner.

use std::io::Read;
use std::sync::Arc;

use fusemod_core::{FsError, FsResult, Tree};
use fusemod_proto::{
    parse_command, Command, ErrorCode, FrameError, FrameReader, FrameRole, ValidationError,
    STATUS_OK,
};
use tracing::{debug, error, info, warn};

use crate::context::FuseModContext;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("rejected frame: {0}")]
    Frame(#[from] FrameError),
    #[error("malformed command: {0}")]
    Payload(#[from] ValidationError),
    #[error("command failed: {0}")]
    Command(#[from] FsError),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::Frame(err) => err.code(),
            DispatchError::Payload(err) => err.code(),
            DispatchError::Command(err) => err.code(),
        }
    }
}

/// How the command loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The inbound stream ended on a frame boundary
    Finished,
    /// A frame or command failed; the process must shut down
    Fatal { code: ErrorCode },
}

/// Apply one validated command to the tree.
pub fn execute(tree: &mut Tree, command: &Command<'_>) -> FsResult<()> {
    match *command {
        Command::MakeDir { path } => tree.create_directory(path),
        Command::MakeFile { flags, path } => tree.create_file(path, flags),
        Command::RemoveDir { path } => tree.delete_directory(path),
        Command::RemoveFile { path } => tree.delete_file(path),
        Command::SetContent { path, content } => tree.set_content(path, content),
        Command::AppendContent { path, content } => tree.append_content(path, content),
        Command::NotifyEcho => Ok(()),
    }
}

pub struct Dispatcher<R> {
    ctx: Arc<FuseModContext>,
    reader: FrameReader<R>,
}

impl<R: Read> Dispatcher<R> {
    pub fn new(ctx: Arc<FuseModContext>, inbound: R) -> Self {
        Self {
            ctx,
            reader: FrameReader::new(inbound, FrameRole::Request),
        }
    }

    /// Process frames until the inbound stream ends or something fails.
    pub fn run(mut self) -> DispatchOutcome {
        info!(target: "fusemod::dispatch", "command loop started");
        loop {
            let (msg_type, result) = match self.reader.read_frame() {
                Ok(None) => {
                    info!(target: "fusemod::dispatch", "inbound stream closed");
                    return DispatchOutcome::Finished;
                }
                Ok(Some(frame)) => (frame.msg_type, self.handle(frame.msg_type, &frame.payload)),
                Err(err) => {
                    let msg_type = self.reader.last_msg_type().unwrap_or(0);
                    (msg_type, Err(DispatchError::Frame(err)))
                }
            };

            let status = match &result {
                Ok(()) => STATUS_OK,
                Err(err) => err.code().as_u8(),
            };
            if let Err(send_err) = self.ctx.send_frame(msg_type, &[status]) {
                error!(
                    target: "fusemod::dispatch",
                    msg_type,
                    error = %send_err,
                    "failed to write response"
                );
                let code = match result {
                    Err(err) => err.code(),
                    Ok(()) => send_err.code(),
                };
                return DispatchOutcome::Fatal { code };
            }

            if let Err(err) = result {
                warn!(
                    target: "fusemod::dispatch",
                    msg_type,
                    code = err.code().as_u8(),
                    error = %err,
                    "fatal control channel error"
                );
                return DispatchOutcome::Fatal { code: err.code() };
            }
        }
    }

    fn handle(&self, msg_type: u16, payload: &[u8]) -> Result<(), DispatchError> {
        let command = parse_command(msg_type, payload)?;
        debug!(
            target: "fusemod::dispatch",
            msg_type,
            path = %String::from_utf8_lossy(command.path().unwrap_or_default()),
            "dispatching command"
        );
        self.ctx.with_tree(|tree| execute(tree, &command))?;
        Ok(())
    }
}
