//! ContainerBackend trait - where containers live between operations.

use std::time::Duration;

use crate::container::Container;
use crate::error::CfsResult;
use crate::layout::Layout;

/// Sector grids addressed by volume index and sector index.
///
/// A sector that was never written reads back as all-dead cells.
pub trait SectorStore {
    fn read_sector(&self, layout: &Layout, volume: usize, sector: usize) -> CfsResult<Vec<i32>>;

    fn write_sector(
        &mut self,
        layout: &Layout,
        volume: usize,
        sector: usize,
        cells: &[i32],
    ) -> CfsResult<()>;
}

/// Storage for one container: its metadata plus a sector store.
///
/// Sessions wrap every operation in `lock`/`unlock` and compare
/// `generation` against their cached copy before using it, so several
/// sessions (or processes) can share one backend location.
pub trait ContainerBackend: SectorStore + Send + Sync {
    /// Load the stored metadata, stamped with its generation. Returns None if
    /// nothing has been committed yet.
    fn load(&self) -> CfsResult<Option<Container>>;

    /// Generation of the stored metadata, 0 if nothing has been committed.
    fn generation(&self) -> CfsResult<u64>;

    /// Replace the stored metadata, recording `container.generation()`.
    fn commit(&mut self, container: &Container) -> CfsResult<()>;

    /// Take exclusive access, waiting at most `timeout`.
    fn lock(&mut self, timeout: Duration) -> CfsResult<()>;

    /// Release access taken by `lock`. A no-op when not locked.
    fn unlock(&mut self) -> CfsResult<()>;

    /// Human-readable location, for messages.
    fn describe(&self) -> String;
}
