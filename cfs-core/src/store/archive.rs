//! On-disk container backend.
//!
//! A container at `frames.cfs` is two files:
//! - `frames.cfs`: ZIP archive with `container.json` (layout, space maps,
//!   nodes) and `generation`, the commit stamp
//! - `frames.cfs.sectors`: every sector at a fixed offset of
//!   `(volume * sectors_per_volume + sector) * cells * 4` bytes, cells as
//!   little-endian `i32`, row-major
//!
//! Appending a frame writes one sector record and recommits the metadata.
//! Metadata commits go to a sibling temporary file that is renamed over the
//! archive, so a crash mid-commit leaves the previous metadata intact.
//!
//! `lock` takes an exclusive OS lock on the sector file. Every handle on the
//! same container, in this process or another, contends for it.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::backend::{ContainerBackend, SectorStore};
use crate::container::Container;
use crate::error::{CfsError, CfsResult};
use crate::layout::Layout;

const METADATA_ENTRY: &str = "container.json";
const GENERATION_ENTRY: &str = "generation";
const SECTORS_SUFFIX: &str = ".sectors";
const LOCK_POLL: Duration = Duration::from_millis(5);

/// Container stored on disk as a metadata archive plus a sector file.
pub struct ArchiveBackend {
    path: PathBuf,
    lock: Option<File>,
}

impl ArchiveBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file holding sector grids.
    pub fn sectors_path(&self) -> PathBuf {
        self.sibling(SECTORS_SUFFIX)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn open_metadata(&self) -> CfsResult<Option<BufReader<File>>> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl SectorStore for ArchiveBackend {
    fn read_sector(&self, layout: &Layout, volume: usize, sector: usize) -> CfsResult<Vec<i32>> {
        let offset = sector_offset(layout, volume, sector)?;
        let dead = || vec![0; layout.cells_per_sector()];

        let mut file = match File::open(self.sectors_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(dead()),
            Err(e) => return Err(e.into()),
        };
        if offset >= file.metadata()?.len() {
            return Ok(dead());
        }

        let mut bytes = vec![0u8; record_len(layout)];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn write_sector(
        &mut self,
        layout: &Layout,
        volume: usize,
        sector: usize,
        cells: &[i32],
    ) -> CfsResult<()> {
        if cells.len() != layout.cells_per_sector() {
            return Err(CfsError::Corrupt(format!(
                "sector record has {} cells, expected {}",
                cells.len(),
                layout.cells_per_sector()
            )));
        }
        let offset = sector_offset(layout, volume, sector)?;
        let bytes: Vec<u8> = cells.iter().flat_map(|cell| cell.to_le_bytes()).collect();

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.sectors_path())?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        debug!("wrote sector {} of volume {} at offset {}", sector, volume, offset);
        Ok(())
    }
}

impl ContainerBackend for ArchiveBackend {
    fn load(&self) -> CfsResult<Option<Container>> {
        match self.open_metadata()? {
            Some(reader) => read_metadata(reader).map(Some),
            None => Ok(None),
        }
    }

    fn generation(&self) -> CfsResult<u64> {
        match self.open_metadata()? {
            Some(reader) => read_generation(&mut ZipArchive::new(reader)?),
            None => Ok(0),
        }
    }

    fn commit(&mut self, container: &Container) -> CfsResult<()> {
        let temp = self.temp_path();
        {
            let writer = BufWriter::new(File::create(&temp)?);
            let mut writer = write_metadata(writer, container)?;
            writer.flush()?;
        }
        std::fs::rename(&temp, &self.path)?;
        debug!(
            "committed generation {} to {}",
            container.generation(),
            self.path.display()
        );
        Ok(())
    }

    fn lock(&mut self, timeout: Duration) -> CfsResult<()> {
        if self.lock.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.sectors_path())?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock() {
                Ok(()) => {
                    self.lock = Some(file);
                    return Ok(());
                }
                Err(TryLockError::WouldBlock) if Instant::now() < deadline => {
                    std::thread::sleep(LOCK_POLL);
                }
                Err(TryLockError::WouldBlock) => {
                    warn!("timed out waiting for lock on {}", self.path.display());
                    return Err(CfsError::LockTimeout);
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }
    }

    fn unlock(&mut self) -> CfsResult<()> {
        if let Some(file) = self.lock.take() {
            file.unlock()?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn record_len(layout: &Layout) -> usize {
    layout.cells_per_sector() * 4
}

fn sector_offset(layout: &Layout, volume: usize, sector: usize) -> CfsResult<u64> {
    if volume >= layout.volume_count || sector >= layout.sectors_per_volume {
        return Err(CfsError::Corrupt(format!(
            "sector {} of volume {} is out of range",
            sector, volume
        )));
    }
    Ok(((volume * layout.sectors_per_volume + sector) * record_len(layout)) as u64)
}

/// Write container metadata as a ZIP archive.
pub fn write_metadata<W: Write + Seek>(writer: W, container: &Container) -> CfsResult<W> {
    let mut zip = ZipWriter::new(writer);

    zip.start_file(METADATA_ENTRY, entry_options())?;
    zip.write_all(container.metadata_json()?.as_bytes())?;

    zip.start_file(GENERATION_ENTRY, entry_options())?;
    zip.write_all(container.generation().to_string().as_bytes())?;

    Ok(zip.finish()?)
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Read container metadata from a ZIP archive.
pub fn read_metadata<R: Read + Seek>(reader: R) -> CfsResult<Container> {
    let mut archive = ZipArchive::new(reader)?;

    let mut text = String::new();
    archive.by_name(METADATA_ENTRY)?.read_to_string(&mut text)?;
    let mut container = Container::from_metadata_json(&text)?;
    container.set_generation(read_generation(&mut archive)?);
    Ok(container)
}

fn read_generation<R: Read + Seek>(archive: &mut ZipArchive<R>) -> CfsResult<u64> {
    let mut text = String::new();
    archive.by_name(GENERATION_ENTRY)?.read_to_string(&mut text)?;
    text.trim()
        .parse()
        .map_err(|_| CfsError::Corrupt(format!("invalid generation '{}'", text.trim())))
}
