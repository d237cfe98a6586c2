// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! State shared by the dispatcher thread and the FUSE session

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fusemod_core::Tree;
use fusemod_proto::{encode, FrameError};
use tracing::trace;

/// The tree and the outbound control stream.
///
/// Each sits behind its own mutex. The tree lock is only ever held around
/// tree access and never across stream I/O; the outbound lock is held for
/// exactly one frame so frames from different threads never interleave.
pub struct FuseModContext {
    tree: Mutex<Tree>,
    outbound: Mutex<Box<dyn Write + Send>>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FuseModContext {
    pub fn new(tree: Tree, outbound: impl Write + Send + 'static) -> Self {
        Self {
            tree: Mutex::new(tree),
            outbound: Mutex::new(Box::new(outbound)),
        }
    }

    /// Run `f` with exclusive access to the tree.
    pub fn with_tree<T>(&self, f: impl FnOnce(&mut Tree) -> T) -> T {
        let mut tree = lock(&self.tree);
        f(&mut tree)
    }

    /// Encode and write one outbound frame.
    pub fn send_frame(&self, msg_type: u16, payload: &[u8]) -> Result<(), FrameError> {
        let frame = encode(msg_type, payload)?;
        let mut out = lock(&self.outbound);
        out.write_all(&frame)?;
        out.flush()?;
        trace!(target: "fusemod::frame", msg_type, len = frame.len(), "sent frame");
        Ok(())
    }

    /// Drop the outbound stream. Later sends fail with a broken pipe.
    pub fn close_outbound(&self) {
        *lock(&self.outbound) = Box::new(ClosedStream);
    }
}

struct ClosedStream;

impl Write for ClosedStream {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
