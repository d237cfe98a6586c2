// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Named pipes carrying the control channel

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use tracing::{debug, info};

/// Create a FIFO at `path` unless one is already there.
pub fn ensure_fifo(path: &Path, mode: u32) -> Result<()> {
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(mode as libc::mode_t)) {
        Ok(()) => {
            debug!(target: "fusemod::dispatch", path = %path.display(), mode, "created fifo");
            Ok(())
        }
        Err(Errno::EEXIST) => {
            let file_type = fs::metadata(path)
                .with_context(|| format!("failed to stat {}", path.display()))?
                .file_type();
            if !file_type.is_fifo() {
                bail!("{} exists and is not a FIFO", path.display());
            }
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("mkfifo {}", path.display())),
    }
}

/// Create both control FIFOs and open them: inbound for reading, then
/// outbound for writing. Each open blocks until the controller opens the
/// other end, so the controller must open them in the same order.
pub fn open_control_pipes(inbound: &Path, outbound: &Path, mode: u32) -> Result<(File, File)> {
    ensure_fifo(inbound, mode)?;
    ensure_fifo(outbound, mode)?;

    info!(
        target: "fusemod::dispatch",
        path = %inbound.display(),
        "waiting for controller on inbound pipe"
    );
    let reader = File::open(inbound)
        .with_context(|| format!("failed to open {} for reading", inbound.display()))?;
    info!(
        target: "fusemod::dispatch",
        path = %outbound.display(),
        "waiting for controller on outbound pipe"
    );
    let writer = OpenOptions::new()
        .write(true)
        .open(outbound)
        .with_context(|| format!("failed to open {} for writing", outbound.display()))?;
    Ok((reader, writer))
}
