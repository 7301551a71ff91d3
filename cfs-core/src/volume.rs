//! Volumes, their space maps, and the sector allocator.
//!
//! Each volume owns a fixed number of sectors plus a same-length used/free
//! bitmap. Sectors are handed out lowest-index-first and never freed. The
//! grids themselves live in the backend's sector store.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CfsError, CfsResult};
use crate::frame::Frame;
use crate::layout::Layout;

/// A fixed-capacity partition of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    space_map: Vec<bool>,
}

impl Volume {
    fn new(name: String, sectors: usize) -> Self {
        Self {
            name,
            space_map: vec![false; sectors],
        }
    }

    pub fn capacity(&self) -> usize {
        self.space_map.len()
    }

    pub fn is_used(&self, sector: usize) -> bool {
        self.space_map.get(sector).copied().unwrap_or(false)
    }

    pub fn used_count(&self) -> usize {
        self.space_map.iter().filter(|&&used| used).count()
    }

    /// Used sector indices, ascending.
    pub fn used_sectors(&self) -> impl Iterator<Item = usize> + '_ {
        self.space_map
            .iter()
            .enumerate()
            .filter_map(|(i, &used)| used.then_some(i))
    }

    fn next_free(&self) -> Option<usize> {
        self.space_map.iter().position(|&used| !used)
    }
}

/// Owns every volume's sector space and space map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAllocator {
    layout: Layout,
    volumes: Vec<Volume>,
}

impl VolumeAllocator {
    /// Format fresh, fully free volumes.
    pub fn format(layout: Layout) -> Self {
        let volumes = (0..layout.volume_count)
            .map(|i| Volume::new(layout.volume_name(i), layout.sectors_per_volume))
            .collect();
        Self { layout, volumes }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn volume(&self, name: &str) -> CfsResult<&Volume> {
        let idx = self.index(name)?;
        Ok(&self.volumes[idx])
    }

    /// First free sector of a volume, without claiming it.
    pub fn next_free(&self, volume: &str) -> CfsResult<Option<usize>> {
        Ok(self.volume(volume)?.next_free())
    }

    /// Mark a sector used. Only called right after `next_free` found it free.
    pub fn mark_used(&mut self, volume: &str, sector: usize) -> CfsResult<()> {
        let idx = self.index(volume)?;
        let vol = &mut self.volumes[idx];
        match vol.space_map.get_mut(sector) {
            Some(slot) => {
                *slot = true;
                Ok(())
            }
            None => Err(CfsError::Corrupt(format!(
                "sector {} out of range on {}",
                sector, volume
            ))),
        }
    }

    /// Claim the lowest free sector of a volume.
    pub fn allocate(&mut self, volume: &str) -> CfsResult<usize> {
        match self.next_free(volume)? {
            Some(sector) => {
                self.mark_used(volume, sector)?;
                debug!("allocated sector {} on {}", sector, volume);
                Ok(sector)
            }
            None => {
                warn!("{} has no free sectors", volume);
                Err(CfsError::OutOfSpace {
                    volume: volume.to_string(),
                })
            }
        }
    }

    pub fn used_count(&self, volume: &str) -> CfsResult<usize> {
        Ok(self.volume(volume)?.used_count())
    }

    /// Used sectors summed across all volumes.
    pub fn used_sectors(&self) -> usize {
        self.volumes.iter().map(Volume::used_count).sum()
    }

    pub fn total_capacity(&self) -> usize {
        self.layout.total_sectors()
    }

    pub fn free_sectors(&self) -> usize {
        self.total_capacity() - self.used_sectors()
    }

    pub(crate) fn check_shape(&self, frame: &Frame) -> CfsResult<()> {
        let (w, h) = (self.layout.sector_width, self.layout.sector_height);
        if frame.width() != w || frame.height() != h {
            return Err(CfsError::FrameShape {
                expected_width: w,
                expected_height: h,
                width: frame.width(),
                height: frame.height(),
            });
        }
        Ok(())
    }

    /// Position of a volume, which is also its slot in the sector store.
    pub(crate) fn index(&self, name: &str) -> CfsResult<usize> {
        self.layout
            .volume_index(name)
            .filter(|&i| i < self.volumes.len())
            .ok_or_else(|| CfsError::PathNotFound(format!("/{}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Layout {
        Layout {
            volume_count: 2,
            sectors_per_volume: 3,
            sector_width: 2,
            sector_height: 2,
            ..Layout::default()
        }
    }

    #[test]
    fn test_allocate_lowest_first() {
        let mut alloc = VolumeAllocator::format(small());
        assert_eq!(alloc.allocate("FV0").unwrap(), 0);
        assert_eq!(alloc.allocate("FV0").unwrap(), 1);
        assert_eq!(alloc.allocate("FV1").unwrap(), 0);
        assert_eq!(alloc.used_count("FV0").unwrap(), 2);
        assert_eq!(alloc.used_sectors(), 3);
    }

    #[test]
    fn test_allocate_out_of_space() {
        let mut alloc = VolumeAllocator::format(small());
        for _ in 0..3 {
            alloc.allocate("FV1").unwrap();
        }
        let err = alloc.allocate("FV1").unwrap_err();
        assert!(matches!(err, CfsError::OutOfSpace { ref volume } if volume == "FV1"));
        assert_eq!(alloc.used_count("FV1").unwrap(), 3);
        assert_eq!(alloc.next_free("FV0").unwrap(), Some(0));
    }

    #[test]
    fn test_allocation_never_repeats() {
        let mut alloc = VolumeAllocator::format(small());
        let mut seen = Vec::new();
        while let Ok(sector) = alloc.allocate("FV0") {
            assert!(!seen.contains(&sector));
            seen.push(sector);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_capacity_accounting() {
        let mut alloc = VolumeAllocator::format(small());
        assert_eq!(alloc.free_sectors(), 6);
        alloc.allocate("FV0").unwrap();
        assert_eq!(alloc.used_sectors() + alloc.free_sectors(), alloc.total_capacity());
        assert_eq!(alloc.free_sectors(), 5);
    }

    #[test]
    fn test_sector_shape_checked() {
        let alloc = VolumeAllocator::format(small());
        assert!(alloc.check_shape(&Frame::new(2, 2)).is_ok());
        let err = alloc.check_shape(&Frame::new(3, 3)).unwrap_err();
        assert!(matches!(err, CfsError::FrameShape { .. }));
    }

    #[test]
    fn test_volume_index() {
        let alloc = VolumeAllocator::format(small());
        assert_eq!(alloc.index("FV1").unwrap(), 1);
        assert!(matches!(alloc.index("FV2"), Err(CfsError::PathNotFound(_))));
    }

    #[test]
    fn test_unknown_volume() {
        let mut alloc = VolumeAllocator::format(small());
        assert!(matches!(alloc.allocate("FV2"), Err(CfsError::PathNotFound(_))));
    }
}
