//! In-memory container backend.

use std::collections::HashMap;
use std::time::Duration;

use super::backend::{ContainerBackend, SectorStore};
use crate::container::Container;
use crate::error::CfsResult;
use crate::layout::Layout;

/// Keeps the last committed metadata and every written sector in memory.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    image: Option<Container>,
    sectors: HashMap<(usize, usize), Vec<i32>>,
    commits: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing metadata. Its sectors read as dead.
    pub fn with_container(container: Container) -> Self {
        Self {
            image: Some(container),
            ..Self::default()
        }
    }

    /// Number of times `commit` has been called.
    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

impl SectorStore for MemoryBackend {
    fn read_sector(&self, layout: &Layout, volume: usize, sector: usize) -> CfsResult<Vec<i32>> {
        Ok(self
            .sectors
            .get(&(volume, sector))
            .cloned()
            .unwrap_or_else(|| vec![0; layout.cells_per_sector()]))
    }

    fn write_sector(
        &mut self,
        _layout: &Layout,
        volume: usize,
        sector: usize,
        cells: &[i32],
    ) -> CfsResult<()> {
        self.sectors.insert((volume, sector), cells.to_vec());
        Ok(())
    }
}

impl ContainerBackend for MemoryBackend {
    fn load(&self) -> CfsResult<Option<Container>> {
        Ok(self.image.clone())
    }

    fn generation(&self) -> CfsResult<u64> {
        Ok(self.image.as_ref().map_or(0, Container::generation))
    }

    fn commit(&mut self, container: &Container) -> CfsResult<()> {
        self.image = Some(container.clone());
        self.commits += 1;
        Ok(())
    }

    fn lock(&mut self, _timeout: Duration) -> CfsResult<()> {
        Ok(())
    }

    fn unlock(&mut self) -> CfsResult<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}
