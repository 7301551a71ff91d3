//! Frame append and read-back.
//!
//! Appending claims the lowest free sector on the file's volume, writes the
//! grid there, and records the sector at the end of the file's sector list.
//! Frames are numbered from 1 in the order they were appended.
//!
//! Grids go straight to the `SectorStore`; only the container's metadata is
//! changed in memory.

use log::{debug, warn};

use crate::container::Container;
use crate::error::{CfsError, CfsResult};
use crate::frame::Frame;
use crate::node::{now_millis, InodeId};
use crate::store::SectorStore;

/// Append a frame to a file. Returns the new frame number.
///
/// Fails without touching the file or the space map when the volume has no
/// free sector or the file's sector list is full.
pub fn append_frame<S: SectorStore + ?Sized>(
    container: &mut Container,
    store: &mut S,
    file: InodeId,
    frame: &Frame,
) -> CfsResult<usize> {
    container.allocator.check_shape(frame)?;

    let capacity = container.layout().file_capacity();
    let (volume, name, count) = {
        let node = container
            .tree
            .file(file)
            .ok_or_else(|| CfsError::PathNotFound(format!("file inode {}", file)))?;
        (node.volume.clone(), node.name.clone(), node.sector_count())
    };

    let Some(sector) = container.allocator.next_free(&volume)? else {
        warn!("append to {} failed: {} is out of space", name, volume);
        return Err(CfsError::OutOfSpace { volume });
    };
    if count >= capacity {
        return Err(CfsError::FileFull(name));
    }

    let index = container.allocator.index(&volume)?;
    store.write_sector(container.layout(), index, sector, frame.cells())?;
    container.allocator.mark_used(&volume, sector)?;

    let node = container
        .tree
        .file_mut(file)
        .ok_or_else(|| CfsError::PathNotFound(format!("file inode {}", file)))?;
    node.push_sector(sector, now_millis());
    debug!("{}: frame {} -> {} sector {}", name, count + 1, volume, sector);
    Ok(node.sector_count())
}

/// Read 1-based frame `n` of a file.
pub fn read_frame<S: SectorStore + ?Sized>(
    container: &Container,
    store: &S,
    file: InodeId,
    n: usize,
) -> CfsResult<Frame> {
    let node = container
        .tree
        .file(file)
        .ok_or_else(|| CfsError::PathNotFound(format!("file inode {}", file)))?;
    let count = node.sector_count();
    let sector = match node.sector_for_frame(n) {
        Some(sector) => sector,
        None => return Err(CfsError::InvalidFrame { frame: n, count }),
    };
    let layout = container.layout();
    let cells = store.read_sector(layout, container.allocator.index(&node.volume)?, sector)?;
    Frame::from_cells(layout.sector_width, layout.sector_height, cells)
}

/// Number of frames stored in a file.
pub fn sector_count(container: &Container, file: InodeId) -> CfsResult<usize> {
    container
        .tree
        .file(file)
        .map(|f| f.sector_count())
        .ok_or_else(|| CfsError::PathNotFound(format!("file inode {}", file)))
}
