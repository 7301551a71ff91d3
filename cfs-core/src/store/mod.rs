//! Persistence backends for containers.
//!
//! - `ContainerBackend`: metadata commits, generation stamps and locking
//! - `SectorStore`: per-sector grid reads and writes
//! - `MemoryBackend`: everything in memory, nothing touches disk
//! - `ArchiveBackend`: ZIP metadata plus a fixed-offset sector file

mod archive;
mod backend;
mod memory;

pub use archive::ArchiveBackend;
pub use backend::{ContainerBackend, SectorStore};
pub use memory::MemoryBackend;
