//! Cellular Frame Store Core
//!
//! This crate stores cellular-automaton grid snapshots ("frames") as
//! fixed-size sectors inside a small multi-volume container:
//! - Volumes with a free-space map and lowest-index-first allocation
//! - Directory and file inodes, one directory level deep
//! - An absolute path grammar (`/FVn/dir/file`)
//! - Recording and playback sessions driven by a line protocol
//!
//! # Architecture
//!
//! The store uses a layered design:
//! - `VolumeAllocator`: sector space and space maps per volume
//! - `NodeTree` / `LookupEngine`: inodes and name lookups
//! - `Container`: metadata, committed through a `ContainerBackend` whose
//!   `SectorStore` holds the grids
//! - `Cfs`: the session every operation runs through

pub mod container;
pub mod error;
pub mod frame;
pub mod layout;
pub mod lookup;
pub mod node;
pub mod path;
pub mod player;
pub mod protocol;
pub mod recorder;
pub mod sector_io;
pub mod session;
pub mod store;
pub mod volume;

pub use container::Container;
pub use error::{CfsError, CfsResult};
pub use frame::Frame;
pub use layout::{CfsConfig, Layout};
pub use lookup::{Existence, LookupEngine, Scope};
pub use node::{DirectoryNode, Entry, EntryKind, FileNode, InodeId, Listing, Node, NodeKind, NodeTree};
pub use path::{absolutize, resolve, PathDescriptor, PathKind};
pub use player::{PlaybackStep, PlaybackSummary, Player};
pub use protocol::{ControlCommand, SessionState, Stopwatch};
pub use recorder::{RecordOutcome, Recorder, RecordingSummary, StopReason};
pub use session::{Cfs, MountKind, SpaceReport};
pub use store::{ArchiveBackend, ContainerBackend, MemoryBackend, SectorStore};
pub use volume::{Volume, VolumeAllocator};
