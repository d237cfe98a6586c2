// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for FuseMod

use std::collections::HashMap;
use std::time::SystemTime;

use fusemod_proto::CapabilityFlags;

/// Arena identifier of a tree node. Ids are never reused while the tree lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub const ROOT: NodeId = NodeId(1);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    File,
}

/// Tree node payload
#[derive(Clone, Debug)]
pub enum NodeKind {
    File {
        content: Vec<u8>,
        flags: CapabilityFlags,
    },
    Directory {
        children: HashMap<Vec<u8>, NodeId>,
    },
}

/// Tree node
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    /// Path component; empty for the root
    pub name: Vec<u8>,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: SystemTime,
}

impl Node {
    pub fn file_kind(&self) -> FileKind {
        match self.kind {
            NodeKind::File { .. } => FileKind::File,
            NodeKind::Directory { .. } => FileKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// Logical content length; zero for directories
    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File { content, .. } => content.len() as u64,
            NodeKind::Directory { .. } => 0,
        }
    }

    /// Capability flags of a file; empty for directories
    pub fn flags(&self) -> CapabilityFlags {
        match &self.kind {
            NodeKind::File { flags, .. } => *flags,
            NodeKind::Directory { .. } => CapabilityFlags::empty(),
        }
    }
}

/// Attributes reported to the kernel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub kind: FileKind,
    /// Full mode including the file type bits
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: SystemTime,
    pub flags: CapabilityFlags,
}

impl Attributes {
    /// Permission bits without the file type
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

impl From<&Node> for Attributes {
    fn from(node: &Node) -> Self {
        Attributes {
            kind: node.file_kind(),
            mode: node.mode,
            nlink: if node.is_dir() { 2 } else { 1 },
            uid: node.uid,
            gid: node.gid,
            size: node.size(),
            mtime: node.mtime,
            flags: node.flags(),
        }
    }
}

/// Directory entry information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub kind: FileKind,
}
