//! Container layout and session configuration.
//!
//! The layout is fixed when a container is formatted and must match on every
//! subsequent open. Layouts may be loaded from a JSON file:
//!
//! ```json
//! { "volumeCount": 2, "sectorsPerVolume": 64, "sectorWidth": 10, "sectorHeight": 10 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CfsError, CfsResult};

/// Prefix of every volume name (`FV0`, `FV1`, ...).
pub const VOLUME_PREFIX: &str = "FV";

/// Default mode string for new files.
pub const DEFAULT_MODE: &str = "rw-";

/// Default owner recorded on new files.
pub const DEFAULT_OWNER: &str = "cfs";

/// Placeholder for listing columns that do not apply.
pub const NO_DATA: &str = "---";

/// Capacity constants forming the container contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layout {
    pub volume_count: usize,
    pub sectors_per_volume: usize,
    pub sector_width: usize,
    pub sector_height: usize,
    pub max_dir_files: usize,
    /// Sector slots per file. Zero means "same as sectors per volume".
    pub max_file_sectors: usize,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            volume_count: 4,
            sectors_per_volume: 600,
            sector_width: 20,
            sector_height: 20,
            max_dir_files: 1024,
            max_file_sectors: 0,
        }
    }
}

impl Layout {
    /// Load a layout from JSON text. Missing fields take default values.
    pub fn from_json(text: &str) -> CfsResult<Self> {
        let layout: Layout = serde_json::from_str(text)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Load a layout from a JSON file.
    pub fn from_json_path(path: impl AsRef<Path>) -> CfsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> CfsResult<()> {
        let checks = [
            ("volumeCount", self.volume_count),
            ("sectorsPerVolume", self.sectors_per_volume),
            ("sectorWidth", self.sector_width),
            ("sectorHeight", self.sector_height),
            ("maxDirFiles", self.max_dir_files),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(CfsError::InvalidLayout(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    /// Effective sector slots per file.
    pub fn file_capacity(&self) -> usize {
        if self.max_file_sectors == 0 {
            self.sectors_per_volume
        } else {
            self.max_file_sectors
        }
    }

    /// Cells per sector grid.
    pub fn cells_per_sector(&self) -> usize {
        self.sector_width * self.sector_height
    }

    /// Total sectors across all volumes.
    pub fn total_sectors(&self) -> usize {
        self.volume_count * self.sectors_per_volume
    }

    /// Name of the volume at `index`.
    pub fn volume_name(&self, index: usize) -> String {
        format!("{}{}", VOLUME_PREFIX, index)
    }

    /// Index of a volume given its name, if it belongs to this layout.
    pub fn volume_index(&self, name: &str) -> Option<usize> {
        let digits = name.strip_prefix(VOLUME_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index: usize = digits.parse().ok()?;
        (index < self.volume_count).then_some(index)
    }

    /// Describe the first field that differs from `other`.
    pub(crate) fn mismatch(&self, other: &Layout) -> Option<String> {
        let pairs = [
            ("volumeCount", self.volume_count, other.volume_count),
            ("sectorsPerVolume", self.sectors_per_volume, other.sectors_per_volume),
            ("sectorWidth", self.sector_width, other.sector_width),
            ("sectorHeight", self.sector_height, other.sector_height),
            ("maxDirFiles", self.max_dir_files, other.max_dir_files),
            ("maxFileSectors", self.file_capacity(), other.file_capacity()),
        ];
        pairs
            .into_iter()
            .find(|(_, a, b)| a != b)
            .map(|(name, a, b)| format!("{}: container has {}, configured {}", name, a, b))
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CfsConfig {
    pub layout: Layout,
    /// Upper bound on waiting for the container lock.
    pub lock_timeout_ms: u64,
    /// Owner recorded on new files.
    pub owner: String,
}

impl Default for CfsConfig {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            lock_timeout_ms: 5_000,
            owner: DEFAULT_OWNER.to_string(),
        }
    }
}

impl CfsConfig {
    pub fn with_layout(layout: Layout) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
