// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory directory tree
//!
//! Nodes live in an arena keyed by [`NodeId`]. Directories map child names
//! to ids and every non-root node records its parent id, so paths can be
//! resolved downward and reconstructed upward without owning cycles.
//!
//! Paths are raw bytes, `/`-rooted. Repeated slashes are skipped while
//! resolving, so `//a///b` names the same node as `/a/b`.

use std::collections::HashMap;
use std::time::SystemTime;

use fusemod_proto::CapabilityFlags;
use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::types::{Attributes, DirEntry, Node, NodeId, NodeKind};

const DIR_MODE: u32 = libc::S_IFDIR as u32 | 0o755;

/// Permission bits a file gets from its capability flags
fn file_mode(flags: CapabilityFlags) -> u32 {
    let perm = match (flags.readable(), flags.writable()) {
        (true, true) => 0o666,
        (true, false) => 0o444,
        (false, true) => 0o222,
        (false, false) => 0o000,
    };
    libc::S_IFREG as u32 | perm
}

fn components(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.split(|b| *b == b'/').filter(|c| !c.is_empty())
}

/// Split a creation path into its parent path and the new entry's name.
fn split_new_entry(path: &[u8]) -> FsResult<(&[u8], &[u8])> {
    if path.first() != Some(&b'/') || path.contains(&0) {
        return Err(FsError::InvalidPath);
    }
    let slash = path.iter().rposition(|b| *b == b'/').ok_or(FsError::InvalidPath)?;
    let name = &path[slash + 1..];
    if name.is_empty() || name == b"." || name == b".." {
        return Err(FsError::InvalidPath);
    }
    Ok((&path[..slash], name))
}

pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    uid: u32,
    gid: u32,
}

impl Tree {
    /// Empty tree owned by the effective user and group of this process.
    pub fn new() -> Self {
        Self::with_owner(
            nix::unistd::geteuid().as_raw(),
            nix::unistd::getegid().as_raw(),
        )
    }

    /// Empty tree whose nodes are created with the given owner.
    pub fn with_owner(uid: u32, gid: u32) -> Self {
        let root = Node {
            id: NodeId::ROOT,
            name: Vec::new(),
            parent: None,
            kind: NodeKind::Directory {
                children: HashMap::new(),
            },
            mode: DIR_MODE,
            uid,
            gid,
            mtime: SystemTime::now(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::ROOT, root);
        Self {
            nodes,
            next_id: NodeId::ROOT.0 + 1,
            uid,
            gid,
        }
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn resolve(&self, path: &[u8]) -> Option<NodeId> {
        let mut current = NodeId::ROOT;
        for component in components(path) {
            match &self.nodes.get(&current)?.kind {
                NodeKind::Directory { children } => current = *children.get(component)?,
                NodeKind::File { .. } => return None,
            }
        }
        Some(current)
    }

    fn resolve_absolute(&self, path: &[u8]) -> FsResult<NodeId> {
        if path.first() != Some(&b'/') {
            return Err(FsError::InvalidPath);
        }
        self.resolve(path).ok_or(FsError::NotFound)
    }

    /// Look up a node. `/` is the root.
    pub fn find(&self, path: &[u8]) -> Option<&Node> {
        if path.first() != Some(&b'/') {
            return None;
        }
        self.resolve(path).and_then(|id| self.nodes.get(&id))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Rebuild the path of a node from its parent links.
    pub fn path_of(&self, id: NodeId) -> Option<Vec<u8>> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent {
            names.push(current.name.as_slice());
            current = self.nodes.get(&parent)?;
        }
        if names.is_empty() {
            return Some(b"/".to_vec());
        }
        let mut path = Vec::new();
        for name in names.iter().rev() {
            path.push(b'/');
            path.extend_from_slice(name);
        }
        Some(path)
    }

    /// Resolve the directory a new entry goes into and check the name is free.
    fn prepare_insert<'p>(&self, path: &'p [u8]) -> FsResult<(NodeId, &'p [u8])> {
        if path.first() == Some(&b'/') && self.resolve(path).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let (parent_path, name) = split_new_entry(path)?;
        let parent_id = self.resolve(parent_path).ok_or(FsError::NotFound)?;
        match self.nodes.get(&parent_id).map(|n| &n.kind) {
            Some(NodeKind::Directory { .. }) => Ok((parent_id, name)),
            Some(NodeKind::File { .. }) => Err(FsError::NotADirectory),
            None => Err(FsError::NotFound),
        }
    }

    fn insert_child(
        &mut self,
        parent_id: NodeId,
        name: &[u8],
        kind: NodeKind,
        mode: u32,
    ) -> NodeId {
        let id = self.allocate_node_id();
        let node = Node {
            id,
            name: name.to_vec(),
            parent: Some(parent_id),
            kind,
            mode,
            uid: self.uid,
            gid: self.gid,
            mtime: SystemTime::now(),
        };
        self.nodes.insert(id, node);
        if let Some(NodeKind::Directory { children }) =
            self.nodes.get_mut(&parent_id).map(|n| &mut n.kind)
        {
            children.insert(name.to_vec(), id);
        }
        id
    }

    pub fn create_directory(&mut self, path: &[u8]) -> FsResult<()> {
        let (parent_id, name) = self.prepare_insert(path)?;
        let kind = NodeKind::Directory {
            children: HashMap::new(),
        };
        let id = self.insert_child(parent_id, name, kind, DIR_MODE);
        debug!(
            target: "fusemod::tree",
            path = %String::from_utf8_lossy(path),
            id = id.0,
            "created directory"
        );
        Ok(())
    }

    pub fn create_file(&mut self, path: &[u8], flags: CapabilityFlags) -> FsResult<()> {
        let (parent_id, name) = self.prepare_insert(path)?;
        let kind = NodeKind::File {
            content: Vec::new(),
            flags,
        };
        let id = self.insert_child(parent_id, name, kind, file_mode(flags));
        debug!(
            target: "fusemod::tree",
            path = %String::from_utf8_lossy(path),
            id = id.0,
            flags = flags.bits(),
            "created file"
        );
        Ok(())
    }

    /// Unlink a node from its parent and drop it together with its subtree.
    fn remove_subtree(&mut self, id: NodeId) -> usize {
        let Some(node) = self.nodes.get(&id) else {
            return 0;
        };
        if let Some(parent_id) = node.parent {
            let name = node.name.clone();
            if let Some(NodeKind::Directory { children }) =
                self.nodes.get_mut(&parent_id).map(|n| &mut n.kind)
            {
                children.remove(&name);
            }
        }

        let mut removed = 0;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                removed += 1;
                if let NodeKind::Directory { children } = node.kind {
                    pending.extend(children.into_values());
                }
            }
        }
        removed
    }

    /// Remove a directory and everything below it.
    pub fn delete_directory(&mut self, path: &[u8]) -> FsResult<()> {
        let id = self.resolve_absolute(path)?;
        if id == NodeId::ROOT {
            return Err(FsError::RootImmutable);
        }
        if !self.nodes.get(&id).is_some_and(Node::is_dir) {
            return Err(FsError::NotADirectory);
        }
        let removed = self.remove_subtree(id);
        debug!(
            target: "fusemod::tree",
            path = %String::from_utf8_lossy(path),
            removed,
            "deleted directory"
        );
        Ok(())
    }

    pub fn delete_file(&mut self, path: &[u8]) -> FsResult<()> {
        let id = self.resolve_absolute(path)?;
        if self.nodes.get(&id).is_some_and(Node::is_dir) {
            return Err(if id == NodeId::ROOT {
                FsError::RootImmutable
            } else {
                FsError::IsADirectory
            });
        }
        self.remove_subtree(id);
        debug!(target: "fusemod::tree", path = %String::from_utf8_lossy(path), "deleted file");
        Ok(())
    }

    /// Content buffer of a file that carries `required`.
    fn file_content_mut(
        &mut self,
        path: &[u8],
        required: CapabilityFlags,
    ) -> FsResult<(&mut Vec<u8>, &mut SystemTime)> {
        let id = self.resolve_absolute(path)?;
        let node = self.nodes.get_mut(&id).ok_or(FsError::NotFound)?;
        match &mut node.kind {
            NodeKind::Directory { .. } => Err(FsError::IsADirectory),
            NodeKind::File { flags, .. } if !flags.contains(required) => Err(FsError::AccessDenied),
            NodeKind::File { content, .. } => Ok((content, &mut node.mtime)),
        }
    }

    /// Replace a file's content wholesale. The file must be readable.
    pub fn set_content(&mut self, path: &[u8], bytes: &[u8]) -> FsResult<()> {
        let (content, mtime) = self.file_content_mut(path, CapabilityFlags::READABLE)?;
        let mut replacement = Vec::new();
        replacement.try_reserve_exact(bytes.len())?;
        replacement.extend_from_slice(bytes);
        *content = replacement;
        *mtime = SystemTime::now();
        Ok(())
    }

    /// Append to a file's content. The file must be readable.
    pub fn append_content(&mut self, path: &[u8], bytes: &[u8]) -> FsResult<()> {
        let (content, mtime) = self.file_content_mut(path, CapabilityFlags::READABLE)?;
        content.try_reserve(bytes.len())?;
        content.extend_from_slice(bytes);
        *mtime = SystemTime::now();
        Ok(())
    }

    /// Write `bytes` at `offset`, growing the file and zero-filling any gap
    /// past the old end. The file must be writable.
    pub fn write_range(&mut self, path: &[u8], bytes: &[u8], offset: u64) -> FsResult<()> {
        let (content, mtime) = self.file_content_mut(path, CapabilityFlags::WRITABLE)?;
        let start = usize::try_from(offset).map_err(|_| FsError::OutOfMemory)?;
        let end = start.checked_add(bytes.len()).ok_or(FsError::OutOfMemory)?;
        if end > content.len() {
            content.try_reserve(end - content.len())?;
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(bytes);
        *mtime = SystemTime::now();
        Ok(())
    }

    pub fn attributes(&self, path: &[u8]) -> FsResult<Attributes> {
        self.find(path).map(Attributes::from).ok_or(FsError::NotFound)
    }

    /// Children of a directory, ordered by name.
    pub fn list_directory(&self, path: &[u8]) -> FsResult<Vec<DirEntry>> {
        let node = self.find(path).ok_or(FsError::NotFound)?;
        let NodeKind::Directory { children } = &node.kind else {
            return Err(FsError::NotADirectory);
        };
        let mut entries: Vec<DirEntry> = children
            .iter()
            .filter_map(|(name, id)| {
                self.nodes.get(id).map(|child| DirEntry {
                    name: name.clone(),
                    kind: child.file_kind(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Up to `size` bytes of a readable file starting at `offset`. An offset
    /// at or past the end yields an empty slice.
    pub fn read(&self, path: &[u8], offset: u64, size: usize) -> FsResult<&[u8]> {
        let node = self.find(path).ok_or(FsError::NotFound)?;
        let NodeKind::File { content, flags } = &node.kind else {
            return Err(FsError::IsADirectory);
        };
        if !flags.readable() {
            return Err(FsError::AccessDenied);
        }
        let len = content.len() as u64;
        if offset >= len {
            return Ok(&[]);
        }
        let start = offset as usize;
        let end = start + size.min(content.len() - start);
        Ok(&content[start..end])
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
