//! The in-memory container image.
//!
//! A container is the store's metadata: the layout it was formatted with,
//! every volume's space map, and the node tree. It serialises to JSON. Sector
//! grids are not part of it; they are read and written one at a time through
//! the backend's `SectorStore`.

use std::collections::HashSet;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{CfsError, CfsResult};
use crate::layout::Layout;
use crate::node::{DirectoryNode, FileNode, NodeTree};
use crate::volume::VolumeAllocator;

/// Version of the container metadata format.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    format_version: u32,
    pub(crate) allocator: VolumeAllocator,
    pub(crate) tree: NodeTree,
    /// Commit stamp of the stored image this copy was read from.
    #[serde(skip)]
    generation: u64,
}

impl Container {
    /// Format a fresh container.
    pub fn format(layout: Layout) -> CfsResult<Self> {
        layout.validate()?;
        info!(
            "formatting container: {} volumes x {} sectors of {}x{}",
            layout.volume_count, layout.sectors_per_volume, layout.sector_width, layout.sector_height
        );
        Ok(Self {
            format_version: FORMAT_VERSION,
            allocator: VolumeAllocator::format(layout),
            tree: NodeTree::new(),
            generation: 0,
        })
    }

    pub fn layout(&self) -> &Layout {
        self.allocator.layout()
    }

    pub fn allocator(&self) -> &VolumeAllocator {
        &self.allocator
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn files(&self) -> impl Iterator<Item = &FileNode> {
        self.tree.files()
    }

    pub fn directories(&self) -> impl Iterator<Item = &DirectoryNode> {
        self.tree.directories()
    }

    /// Serialise the metadata.
    pub fn metadata_json(&self) -> CfsResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Rebuild a container from metadata.
    pub fn from_metadata_json(text: &str) -> CfsResult<Self> {
        let container: Container = serde_json::from_str(text)?;
        if container.format_version != FORMAT_VERSION {
            return Err(CfsError::Corrupt(format!(
                "unsupported format version {}",
                container.format_version
            )));
        }
        container.verify()?;
        Ok(container)
    }

    /// Fail unless this container was formatted with `expected`.
    pub fn check_layout(&self, expected: &Layout) -> CfsResult<()> {
        match self.layout().mismatch(expected) {
            Some(msg) => Err(CfsError::LayoutMismatch(msg)),
            None => Ok(()),
        }
    }

    /// Structural checks: volume shapes, sector ownership, directory links.
    pub fn verify(&self) -> CfsResult<()> {
        let layout = *self.layout();
        layout.validate()?;

        let volumes = self.allocator.volumes();
        if volumes.len() != layout.volume_count {
            return Err(CfsError::Corrupt(format!(
                "expected {} volumes, found {}",
                layout.volume_count,
                volumes.len()
            )));
        }
        for (i, volume) in volumes.iter().enumerate() {
            if volume.name != layout.volume_name(i) || volume.capacity() != layout.sectors_per_volume {
                return Err(CfsError::Corrupt(format!("volume {} has the wrong shape", volume.name)));
            }
        }

        let mut owned = HashSet::new();
        for file in self.tree.files() {
            let volume = self.allocator.volume(&file.volume)?;
            if file.sector_count() > layout.file_capacity() {
                return Err(CfsError::Corrupt(format!("file {} exceeds capacity", file.name)));
            }
            for &sector in file.sectors() {
                if !volume.is_used(sector) || !owned.insert((file.volume.as_str(), sector)) {
                    return Err(CfsError::Corrupt(format!(
                        "sector {} of {} is unallocated or shared",
                        sector, file.volume
                    )));
                }
            }
        }

        for dir in self.tree.directories() {
            if dir.file_count() > layout.max_dir_files {
                return Err(CfsError::Corrupt(format!("directory {} exceeds capacity", dir.name)));
            }
            if dir.files().iter().any(|&id| self.tree.file(id).is_none()) {
                return Err(CfsError::Corrupt(format!(
                    "directory {} references a missing file",
                    dir.name
                )));
            }
        }
        Ok(())
    }
}
