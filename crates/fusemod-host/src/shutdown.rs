// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reasons the host stops, and the process-group kill on fatal errors

use fusemod_proto::ErrorCode;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::getpgrp;

use crate::dispatcher::DispatchOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The controller closed the inbound stream
    InboundClosed,
    /// The dispatcher hit a fatal error
    Fatal(ErrorCode),
    /// The kernel tore down the FUSE session
    Unmounted,
    /// SIGINT or SIGTERM
    Signal,
}

impl ShutdownReason {
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownReason::Fatal(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_failure() {
            1
        } else {
            0
        }
    }
}

impl From<DispatchOutcome> for ShutdownReason {
    fn from(outcome: DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::Finished => ShutdownReason::InboundClosed,
            DispatchOutcome::Fatal { code } => ShutdownReason::Fatal(code),
        }
    }
}

/// SIGTERM every process in our process group, ourselves included.
pub fn terminate_process_group() -> nix::Result<()> {
    killpg(getpgrp(), Signal::SIGTERM)
}
