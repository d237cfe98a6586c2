// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FuseMod FUSE adapter implementation
//!
//! Maps inode-based FUSE requests onto the path-based handlers.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen, ReplyWrite,
    Request, FUSE_ROOT_ID,
};
use fusemod_core::{Attributes, FileKind};
use libc::{c_int, ENOENT};
use tracing::{debug, info};

use crate::config::HostConfig;
use crate::context::FuseModContext;
use crate::handlers;
use crate::shutdown::ShutdownReason;

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Directory => FileType::Directory,
        FileKind::File => FileType::RegularFile,
    }
}

/// Convert tree attributes to FUSE FileAttr
fn attr_to_fuse(attr: &Attributes, ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: file_type(attr.kind),
        perm: attr.perm(),
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

/// Path of an inode and the number of kernel lookups not yet forgotten
struct InodeEntry {
    path: Vec<u8>,
    lookups: u64,
}

/// FuseMod FUSE filesystem adapter
pub struct FuseModFs {
    ctx: Arc<FuseModContext>,
    attr_ttl: Duration,
    entry_ttl: Duration,
    /// inode -> path
    inodes: HashMap<u64, InodeEntry>,
    /// path -> inode
    paths: HashMap<Vec<u8>, u64>,
    next_inode: u64,
    /// Told when the kernel ends the session
    shutdown: Option<Sender<ShutdownReason>>,
}

impl FuseModFs {
    pub fn new(
        ctx: Arc<FuseModContext>,
        config: &HostConfig,
        shutdown: Option<Sender<ShutdownReason>>,
    ) -> Self {
        let mut inodes = HashMap::new();
        let mut paths = HashMap::new();
        inodes.insert(
            FUSE_ROOT_ID,
            InodeEntry {
                path: b"/".to_vec(),
                lookups: 0,
            },
        );
        paths.insert(b"/".to_vec(), FUSE_ROOT_ID);

        Self {
            ctx,
            attr_ttl: config.attr_ttl(),
            entry_ttl: config.entry_ttl(),
            inodes,
            paths,
            next_inode: FUSE_ROOT_ID + 1,
            shutdown,
        }
    }

    fn inode_to_path(&self, ino: u64) -> Option<&[u8]> {
        self.inodes.get(&ino).map(|entry| entry.path.as_slice())
    }

    /// Inode for a path, allocating one the first time the path is seen.
    /// A path keeps its inode across delete and re-create while the kernel
    /// still references it.
    fn get_or_alloc_inode(&mut self, path: &[u8]) -> u64 {
        if let Some(&inode) = self.paths.get(path) {
            return inode;
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        self.paths.insert(path.to_vec(), inode);
        self.inodes.insert(
            inode,
            InodeEntry {
                path: path.to_vec(),
                lookups: 0,
            },
        );
        inode
    }

    /// Inode handed to the kernel in an entry reply; counts one lookup.
    fn remember(&mut self, path: &[u8]) -> u64 {
        let inode = self.get_or_alloc_inode(path);
        if let Some(entry) = self.inodes.get_mut(&inode) {
            entry.lookups += 1;
        }
        inode
    }

    /// Drop `nlookup` kernel references; the mapping goes once none remain.
    fn forget_lookups(&mut self, ino: u64, nlookup: u64) {
        if ino == FUSE_ROOT_ID {
            return;
        }
        let Some(entry) = self.inodes.get_mut(&ino) else {
            return;
        };
        entry.lookups = entry.lookups.saturating_sub(nlookup);
        if entry.lookups == 0 {
            self.forget_inode(ino);
        }
    }

    fn forget_inode(&mut self, ino: u64) {
        if let Some(entry) = self.inodes.remove(&ino) {
            if self.paths.get(&entry.path) == Some(&ino) {
                self.paths.remove(&entry.path);
            }
            debug!(
                target: "fusemod::fuse",
                ino,
                path = %String::from_utf8_lossy(&entry.path),
                "inode forgotten"
            );
        }
    }

    /// Drop inodes that were only listed by readdir (never looked up) and
    /// whose node no longer exists.
    fn prune_unreferenced(&mut self) {
        let stale: Vec<u64> = self
            .inodes
            .iter()
            .filter(|&(&ino, entry)| {
                ino != FUSE_ROOT_ID
                    && entry.lookups == 0
                    && handlers::getattr(&self.ctx, &entry.path).is_err()
            })
            .map(|(&ino, _)| ino)
            .collect();
        for ino in stale {
            self.forget_inode(ino);
        }
    }
}

impl fuser::Filesystem for FuseModFs {
    fn init(&mut self, _req: &Request, _config: &mut fuser::KernelConfig) -> Result<(), c_int> {
        info!(
            target: "fusemod::fuse",
            attr_ttl_ms = self.attr_ttl.as_millis() as u64,
            entry_ttl_ms = self.entry_ttl.as_millis() as u64,
            "FUSE session initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!(target: "fusemod::fuse", "FUSE session destroyed");
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(ShutdownReason::Unmounted);
        }
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inode_to_path(parent) else {
            reply.error(ENOENT);
            return;
        };
        match handlers::lookup(&self.ctx, parent_path, name.as_bytes()) {
            Ok((path, attrs)) => {
                let ino = self.remember(&path);
                reply.entry(&self.entry_ttl, &attr_to_fuse(&attrs, ino), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.forget_lookups(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.inode_to_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match handlers::getattr(&self.ctx, path) {
            Ok(attrs) => reply.attr(&self.attr_ttl, &attr_to_fuse(&attrs, ino)),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inode_to_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match handlers::open(&self.ctx, path, flags) {
            Ok(()) => reply.opened(0, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inode_to_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        match handlers::read(&self.ctx, path, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.inode_to_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        debug!(
            target: "fusemod::fuse",
            path = %String::from_utf8_lossy(path),
            offset,
            len = data.len(),
            "write"
        );
        match handlers::write(&self.ctx, path, data, offset) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inode_to_path(ino).map(<[u8]>::to_vec) else {
            reply.error(ENOENT);
            return;
        };
        let children = match handlers::readdir(&self.ctx, &path) {
            Ok(children) => children,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        self.prune_unreferenced();
        let parent_ino = self.get_or_alloc_inode(handlers::parent_path(&path));
        let mut entries: Vec<(u64, FileType, Vec<u8>)> = Vec::with_capacity(children.len() + 2);
        entries.push((ino, FileType::Directory, b".".to_vec()));
        entries.push((parent_ino, FileType::Directory, b"..".to_vec()));
        for child in children {
            let child_ino = self.get_or_alloc_inode(&handlers::child_path(&path, &child.name));
            entries.push((child_ino, file_type(child.kind), child.name));
        }

        let start = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(start) {
            // `add` reports true once the reply buffer is full
            if reply.add(*entry_ino, (i + 1) as i64, *kind, OsStr::from_bytes(name)) {
                break;
            }
        }
        reply.ok();
    }
}
