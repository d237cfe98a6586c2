// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Kernel-facing operations, addressed by path
//!
//! These functions hold everything the FUSE adapter does apart from inode
//! bookkeeping and replying, so they can be exercised without a mount.
//! Errors are errno values ready to hand to the kernel.

use fusemod_core::{Attributes, DirEntry, FileKind, FsError, NodeKind};
use fusemod_proto::ErrorCode;
use libc::c_int;
use tracing::{debug, warn};

use crate::context::FuseModContext;
use crate::notify::notify_write;

/// Join a directory path and an entry name.
pub fn child_path(parent: &[u8], name: &[u8]) -> Vec<u8> {
    let mut path = Vec::with_capacity(parent.len() + 1 + name.len());
    path.extend_from_slice(parent);
    if !path.ends_with(b"/") {
        path.push(b'/');
    }
    path.extend_from_slice(name);
    path
}

/// Path of the directory containing `path`; the root is its own parent.
pub fn parent_path(path: &[u8]) -> &[u8] {
    match path.iter().rposition(|b| *b == b'/') {
        Some(0) | None => b"/",
        Some(slash) => &path[..slash],
    }
}

pub fn getattr(ctx: &FuseModContext, path: &[u8]) -> Result<Attributes, c_int> {
    ctx.with_tree(|tree| tree.attributes(path)).map_err(|e| e.errno())
}

/// Resolve `name` inside `parent`, returning the child's path and attributes.
pub fn lookup(
    ctx: &FuseModContext,
    parent: &[u8],
    name: &[u8],
) -> Result<(Vec<u8>, Attributes), c_int> {
    let path = child_path(parent, name);
    let attrs = getattr(ctx, &path)?;
    Ok((path, attrs))
}

/// Entries of a directory, without `.` and `..`.
pub fn readdir(ctx: &FuseModContext, path: &[u8]) -> Result<Vec<DirEntry>, c_int> {
    ctx.with_tree(|tree| tree.list_directory(path)).map_err(|e| e.errno())
}

/// Check that a file may be opened with the access mode in `flags`.
pub fn open(ctx: &FuseModContext, path: &[u8], flags: i32) -> Result<(), c_int> {
    let attrs = getattr(ctx, path)?;
    if attrs.kind == FileKind::Directory {
        return Err(libc::EISDIR);
    }
    let accmode = flags & libc::O_ACCMODE;
    let wants_read = accmode == libc::O_RDONLY || accmode == libc::O_RDWR;
    let wants_write = accmode == libc::O_WRONLY || accmode == libc::O_RDWR;
    if (wants_read && !attrs.flags.readable()) || (wants_write && !attrs.flags.writable()) {
        debug!(
            target: "fusemod::fuse",
            path = %String::from_utf8_lossy(path),
            flags,
            "open denied"
        );
        return Err(libc::EACCES);
    }
    Ok(())
}

pub fn read(ctx: &FuseModContext, path: &[u8], offset: i64, size: u32) -> Result<Vec<u8>, c_int> {
    ctx.with_tree(|tree| {
        let node = tree.find(path).ok_or(libc::ENOENT)?;
        if node.is_dir() {
            return Err(libc::EISDIR);
        }
        if !node.flags().readable() {
            return Err(libc::EACCES);
        }
        let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
        tree.read(path, offset, size as usize)
            .map(<[u8]>::to_vec)
            .map_err(|e| e.errno())
    })
}

/// errno for a failed local write
fn write_errno(err: FsError) -> c_int {
    match err.code() {
        ErrorCode::IoError => libc::ENOMEM,
        ErrorCode::InvalidOperation => libc::EACCES,
        _ => libc::EIO,
    }
}

/// Apply a kernel write and notify the controller.
///
/// Copy-on-write files take the bytes into their own content first. The
/// tree lock is released before any notification frame is sent.
pub fn write(ctx: &FuseModContext, path: &[u8], data: &[u8], offset: i64) -> Result<u32, c_int> {
    let offset = ctx.with_tree(|tree| {
        let node = tree.find(path).ok_or(libc::ENOENT)?;
        let NodeKind::File { flags, .. } = &node.kind else {
            return Err(libc::EISDIR);
        };
        let flags = *flags;
        if !flags.writable() {
            return Err(libc::EACCES);
        }
        let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
        if offset + data.len() as u64 > u32::MAX as u64 {
            return Err(libc::EFBIG);
        }
        if flags.copy_on_write() {
            tree.write_range(path, data, offset).map_err(write_errno)?;
        }
        Ok(offset)
    })?;

    notify_write(ctx, path, data, offset).map_err(|err| {
        warn!(
            target: "fusemod::notify",
            path = %String::from_utf8_lossy(path),
            offset,
            error = %err,
            "write notification failed"
        );
        libc::EIO
    })?;
    Ok(data.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusemod_core::Tree;
    use fusemod_proto::CapabilityFlags;

    const RW: CapabilityFlags = CapabilityFlags::READABLE.union(CapabilityFlags::WRITABLE);

    fn create_test_ctx() -> FuseModContext {
        let mut tree = Tree::with_owner(1000, 1000);
        tree.create_directory(b"/d").unwrap();
        tree.create_file(b"/d/rw", RW).unwrap();
        tree.set_content(b"/d/rw", b"hello").unwrap();
        tree.create_file(b"/d/r", CapabilityFlags::READABLE).unwrap();
        tree.create_file(b"/d/w", CapabilityFlags::WRITABLE).unwrap();
        FuseModContext::new(tree, std::io::sink())
    }

    #[test]
    fn test_paths() {
        assert_eq!(child_path(b"/", b"a"), b"/a");
        assert_eq!(child_path(b"/a", b"b"), b"/a/b");
        assert_eq!(parent_path(b"/a/b"), b"/a");
        assert_eq!(parent_path(b"/a"), b"/");
        assert_eq!(parent_path(b"/"), b"/");
    }

    #[test]
    fn test_getattr() {
        let ctx = create_test_ctx();
        let dir = getattr(&ctx, b"/d").unwrap();
        assert_eq!(dir.kind, FileKind::Directory);
        assert_eq!(dir.nlink, 2);
        assert_eq!(dir.mode, libc::S_IFDIR as u32 | 0o755);

        let file = getattr(&ctx, b"/d/rw").unwrap();
        assert_eq!(file.size, 5);
        assert_eq!(file.nlink, 1);
        assert_eq!((file.uid, file.gid), (1000, 1000));

        assert_eq!(getattr(&ctx, b"/nope"), Err(libc::ENOENT));
    }

    #[test]
    fn test_lookup_joins_paths() {
        let ctx = create_test_ctx();
        let (path, attrs) = lookup(&ctx, b"/d", b"rw").unwrap();
        assert_eq!(path, b"/d/rw");
        assert_eq!(attrs.kind, FileKind::File);
        assert_eq!(lookup(&ctx, b"/", b"zz").unwrap_err(), libc::ENOENT);
    }

    #[test]
    fn test_readdir() {
        let ctx = create_test_ctx();
        let names: Vec<Vec<u8>> =
            readdir(&ctx, b"/d").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![b"r".to_vec(), b"rw".to_vec(), b"w".to_vec()]);
        assert_eq!(readdir(&ctx, b"/d/rw").unwrap_err(), libc::ENOTDIR);
        assert_eq!(readdir(&ctx, b"/x").unwrap_err(), libc::ENOENT);
    }

    #[test]
    fn test_open_checks_access_mode() {
        let ctx = create_test_ctx();
        assert_eq!(open(&ctx, b"/d/rw", libc::O_RDWR), Ok(()));
        assert_eq!(open(&ctx, b"/d/r", libc::O_RDONLY), Ok(()));
        assert_eq!(open(&ctx, b"/d/r", libc::O_WRONLY), Err(libc::EACCES));
        assert_eq!(open(&ctx, b"/d/w", libc::O_WRONLY | libc::O_TRUNC), Ok(()));
        assert_eq!(open(&ctx, b"/d/w", libc::O_RDONLY), Err(libc::EACCES));
        assert_eq!(open(&ctx, b"/d/w", libc::O_RDWR), Err(libc::EACCES));
        assert_eq!(open(&ctx, b"/d", libc::O_RDONLY), Err(libc::EISDIR));
        assert_eq!(open(&ctx, b"/missing", libc::O_RDONLY), Err(libc::ENOENT));
    }

    #[test]
    fn test_read() {
        let ctx = create_test_ctx();
        assert_eq!(read(&ctx, b"/d/rw", 0, 10).unwrap(), b"hello");
        assert_eq!(read(&ctx, b"/d/rw", 1, 3).unwrap(), b"ell");
        assert!(read(&ctx, b"/d/rw", 5, 10).unwrap().is_empty());
        assert_eq!(read(&ctx, b"/d/rw", -1, 10), Err(libc::EINVAL));
        assert_eq!(read(&ctx, b"/d/w", 0, 10), Err(libc::EACCES));
        assert_eq!(read(&ctx, b"/d", 0, 10), Err(libc::EISDIR));
        assert_eq!(read(&ctx, b"/nope", 0, 10), Err(libc::ENOENT));
    }

    #[test]
    fn test_write_without_copy_on_write_leaves_content() {
        let ctx = create_test_ctx();
        assert_eq!(write(&ctx, b"/d/rw", b"XY", 0), Ok(2));
        assert_eq!(read(&ctx, b"/d/rw", 0, 10).unwrap(), b"hello");
    }

    #[test]
    fn test_write_errors() {
        let ctx = create_test_ctx();
        assert_eq!(write(&ctx, b"/d/r", b"x", 0), Err(libc::EACCES));
        assert_eq!(write(&ctx, b"/d", b"x", 0), Err(libc::EISDIR));
        assert_eq!(write(&ctx, b"/nope", b"x", 0), Err(libc::ENOENT));
        assert_eq!(write(&ctx, b"/d/w", b"x", -4), Err(libc::EINVAL));
    }

    #[test]
    fn test_write_past_u32_offsets_is_efbig() {
        let ctx = create_test_ctx();
        let cow =
            CapabilityFlags::READABLE | CapabilityFlags::WRITABLE | CapabilityFlags::COPY_ON_WRITE;
        ctx.with_tree(|tree| tree.create_file(b"/d/cow", cow)).unwrap();
        ctx.with_tree(|tree| tree.set_content(b"/d/cow", b"abc")).unwrap();

        assert_eq!(write(&ctx, b"/d/w", b"xy", u32::MAX as i64), Err(libc::EFBIG));
        assert_eq!(write(&ctx, b"/d/cow", b"xy", u32::MAX as i64), Err(libc::EFBIG));
        assert_eq!(getattr(&ctx, b"/d/cow").unwrap().size, 3);
    }

    #[test]
    fn test_write_with_path_too_long_to_notify_is_eio() {
        let ctx = create_test_ctx();
        let mut path = b"/".to_vec();
        path.resize(3054, b'a');
        ctx.with_tree(|tree| tree.create_file(&path, CapabilityFlags::WRITABLE)).unwrap();
        assert_eq!(write(&ctx, &path, b"x", 0), Err(libc::EIO));
    }

    #[test]
    fn test_write_errno_mapping() {
        assert_eq!(write_errno(FsError::OutOfMemory), libc::ENOMEM);
        assert_eq!(write_errno(FsError::AccessDenied), libc::EACCES);
        assert_eq!(write_errno(FsError::IsADirectory), libc::EACCES);
        assert_eq!(write_errno(FsError::NotFound), libc::EIO);
    }

    #[test]
    fn test_write_fails_when_controller_is_gone() {
        let ctx = create_test_ctx();
        ctx.close_outbound();
        assert_eq!(write(&ctx, b"/d/w", b"x", 0), Err(libc::EIO));
    }
}
