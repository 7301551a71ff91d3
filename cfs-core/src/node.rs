//! Directory and file inodes.
//!
//! Nodes live in one flat, creation-ordered list, the way they sit side by
//! side in the container. Ids are sequential per kind and derived by counting
//! existing nodes at creation time, which stays dense because nothing is ever
//! deleted.

use std::time::{SystemTime, UNIX_EPOCH};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{CfsError, CfsResult};
use crate::layout::{Layout, DEFAULT_MODE, NO_DATA};
use crate::lookup::LookupEngine;
use crate::path::{PathDescriptor, PathKind};

/// Inode number of a file or directory.
pub type InodeId = u32;

/// Directory inode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryNode {
    pub id: InodeId,
    pub name: String,
    pub volume: String,
    pub timestamp: String,
    /// Child file inode ids, append-only.
    files: Vec<InodeId>,
}

impl DirectoryNode {
    pub fn files(&self) -> &[InodeId] {
        &self.files
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn contains(&self, file: InodeId) -> bool {
        self.files.contains(&file)
    }
}

/// File inode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: InodeId,
    pub name: String,
    pub volume: String,
    pub mode: String,
    pub owner: String,
    /// Unix milliseconds of creation or last append.
    pub timestamp: String,
    /// Sector indices on `volume`, in frame order, no gaps.
    sectors: Vec<usize>,
}

impl FileNode {
    pub fn sectors(&self) -> &[usize] {
        &self.sectors
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Sector holding 1-based frame `n`.
    pub fn sector_for_frame(&self, n: usize) -> Option<usize> {
        n.checked_sub(1).and_then(|i| self.sectors.get(i)).copied()
    }

    pub(crate) fn push_sector(&mut self, sector: usize, timestamp: String) {
        self.sectors.push(sector);
        self.timestamp = timestamp;
    }
}

/// A container node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    Directory(DirectoryNode),
    File(FileNode),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Directory(d) => &d.name,
            Node::File(f) => &f.name,
        }
    }

    pub fn volume(&self) -> &str {
        match self {
            Node::Directory(d) => &d.volume,
            Node::File(f) => &f.volume,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Directory(_) => NodeKind::Directory,
            Node::File(_) => NodeKind::File,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// Kind column of a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Volume,
    Directory,
    File,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Volume => "VOLUME",
            EntryKind::Directory => "DIR",
            EntryKind::File => "FILE",
        }
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    /// Sectors used by a file, or capacity of a volume.
    pub sectors: Option<usize>,
    /// Files held by a directory.
    pub file_count: Option<usize>,
    pub timestamp: String,
    pub mode: String,
    pub owner: String,
}

impl Entry {
    fn volume(name: String, capacity: usize) -> Self {
        Self {
            name,
            kind: EntryKind::Volume,
            sectors: Some(capacity),
            file_count: None,
            timestamp: "0".to_string(),
            mode: NO_DATA.to_string(),
            owner: NO_DATA.to_string(),
        }
    }

    fn directory(dir: &DirectoryNode) -> Self {
        Self {
            name: dir.name.clone(),
            kind: EntryKind::Directory,
            sectors: None,
            file_count: Some(dir.file_count()),
            timestamp: dir.timestamp.clone(),
            mode: NO_DATA.to_string(),
            owner: NO_DATA.to_string(),
        }
    }

    fn file(file: &FileNode) -> Self {
        Self {
            name: file.name.clone(),
            kind: EntryKind::File,
            sectors: Some(file.sector_count()),
            file_count: None,
            timestamp: file.timestamp.clone(),
            mode: file.mode.clone(),
            owner: file.owner.clone(),
        }
    }
}

/// Lazy, one-shot sequence of listing entries.
pub struct Listing<'a> {
    inner: Box<dyn Iterator<Item = Entry> + 'a>,
}

impl<'a> Listing<'a> {
    fn new(inner: impl Iterator<Item = Entry> + 'a) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Listing<'static> {
    /// Listing over already-collected entries.
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        Self::new(entries.into_iter())
    }
}

impl Iterator for Listing<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        self.inner.next()
    }
}

/// The flat list of all directory and file inodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeTree {
    nodes: Vec<Node>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn directories(&self) -> impl Iterator<Item = &DirectoryNode> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Directory(d) => Some(d),
            Node::File(_) => None,
        })
    }

    pub fn files(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.iter().filter_map(|n| match n {
            Node::File(f) => Some(f),
            Node::Directory(_) => None,
        })
    }

    pub fn directory(&self, id: InodeId) -> Option<&DirectoryNode> {
        self.directories().find(|d| d.id == id)
    }

    pub fn file(&self, id: InodeId) -> Option<&FileNode> {
        self.files().find(|f| f.id == id)
    }

    pub(crate) fn file_mut(&mut self, id: InodeId) -> Option<&mut FileNode> {
        self.nodes.iter_mut().find_map(|n| match n {
            Node::File(f) if f.id == id => Some(f),
            _ => None,
        })
    }

    fn directory_mut(&mut self, id: InodeId) -> Option<&mut DirectoryNode> {
        self.nodes.iter_mut().find_map(|n| match n {
            Node::Directory(d) if d.id == id => Some(d),
            _ => None,
        })
    }

    fn next_directory_id(&self) -> InodeId {
        self.directories().count() as InodeId
    }

    fn next_file_id(&self) -> InodeId {
        self.files().count() as InodeId
    }

    /// Create a directory at `/FVn/name`.
    ///
    /// The caller has already checked that the path is free.
    pub fn create_directory(&mut self, path: &PathDescriptor) -> CfsResult<InodeId> {
        let (volume, name) = match (path.kind(), &path.volume, &path.target) {
            (PathKind::VolumeEntry, Some(v), Some(t)) => (v.clone(), t.clone()),
            _ => {
                return Err(CfsError::InvalidPathSyntax(format!(
                    "Cannot create directory '{}'",
                    path
                )))
            }
        };

        let id = self.next_directory_id();
        info!("mkdir {} as directory inode {}", path, id);
        self.nodes.push(Node::Directory(DirectoryNode {
            id,
            name,
            volume,
            timestamp: now_millis(),
            files: Vec::new(),
        }));
        Ok(id)
    }

    /// Create an empty file at `/FVn/name` or `/FVn/dir/name`.
    ///
    /// When a parent directory is named its child list must have room; a
    /// full directory leaves the tree untouched.
    pub fn create_file(
        &mut self,
        path: &PathDescriptor,
        owner: &str,
        layout: &Layout,
    ) -> CfsResult<InodeId> {
        let (Some(volume), Some(name)) = (&path.volume, &path.target) else {
            return Err(CfsError::InvalidPathSyntax(format!(
                "Cannot create file '{}'",
                path
            )));
        };

        let parent = match &path.directory {
            Some(dir) => {
                let id = LookupEngine::new(self)
                    .find_directory(volume, dir)
                    .ok_or_else(|| CfsError::PathNotFound(format!("/{}/{}", volume, dir)))?;
                let parent = self.directory(id).map(DirectoryNode::file_count).unwrap_or(0);
                if parent >= layout.max_dir_files {
                    return Err(CfsError::DirectoryFull(format!("/{}/{}", volume, dir)));
                }
                Some(id)
            }
            None => None,
        };

        let id = self.next_file_id();
        info!("touch {} as file inode {}", path, id);
        self.nodes.push(Node::File(FileNode {
            id,
            name: name.clone(),
            volume: volume.clone(),
            mode: DEFAULT_MODE.to_string(),
            owner: owner.to_string(),
            timestamp: now_millis(),
            sectors: Vec::with_capacity(layout.file_capacity().min(64)),
        }));

        if let Some(dir) = parent.and_then(|p| self.directory_mut(p)) {
            dir.files.push(id);
        }
        Ok(id)
    }

    /// Enumerate the children of a root, volume, or directory path.
    pub fn list_children<'a>(&'a self, path: &PathDescriptor, layout: &Layout) -> Listing<'a> {
        match path.kind() {
            PathKind::Root => {
                let layout = *layout;
                Listing::new(
                    (0..layout.volume_count)
                        .map(move |i| Entry::volume(layout.volume_name(i), layout.sectors_per_volume)),
                )
            }
            PathKind::Volume => {
                let volume = path.volume.clone().unwrap_or_default();
                let lookup = LookupEngine::new(self);
                let dirs = self
                    .directories()
                    .filter(move |d| d.volume == volume)
                    .map(Entry::directory);
                let volume = path.volume.clone().unwrap_or_default();
                let files = self
                    .files()
                    .filter(move |f| f.volume == volume && lookup.find_parent_directory(f.id).is_none())
                    .map(Entry::file);
                Listing::new(dirs.chain(files))
            }
            PathKind::VolumeEntry => {
                let volume = path.volume.clone().unwrap_or_default();
                let name = path.target.clone().unwrap_or_default();
                match LookupEngine::new(self).find_directory(&volume, &name) {
                    Some(id) => {
                        let children = self
                            .directory(id)
                            .map(|d| d.files().to_vec())
                            .unwrap_or_default();
                        Listing::new(
                            children
                                .into_iter()
                                .filter_map(move |fid| self.file(fid))
                                .map(Entry::file),
                        )
                    }
                    None => Listing::new(std::iter::empty()),
                }
            }
            PathKind::DirectoryEntry => Listing::new(std::iter::empty()),
        }
    }
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
        .to_string()
}
