//! Cfs session - the context every frame store operation runs through.
//!
//! A session provides:
//! - A cached copy of the container metadata and the backend it came from
//! - A current working directory for relative paths
//!
//! Every operation is one step: take the session lock, take the backend's
//! lock, reload the metadata if another handle committed since it was cached,
//! then read or commit. Changes are made to a copy that replaces the cache
//! only after the backend accepts it.
//!
//! Clone is cheap and shares the cache; each clone keeps its own working
//! directory. Lock acquisition is bounded by the configured timeout.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::container::Container;
use crate::error::{CfsError, CfsResult};
use crate::frame::Frame;
use crate::layout::{CfsConfig, Layout};
use crate::lookup::{Existence, LookupEngine};
use crate::node::{Entry, InodeId, Listing};
use crate::path::{absolutize, resolve, PathDescriptor, PathKind};
use crate::sector_io;
use crate::store::{ContainerBackend, MemoryBackend};

/// Whether mounting created a new container or opened an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Created,
    Opened,
}

/// Aggregate sector usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceReport {
    pub used: usize,
    pub free: usize,
    pub total: usize,
}

impl fmt::Display for SpaceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} sectors free ({} used)",
            self.free, self.total, self.used
        )
    }
}

/// Shared session state (interior of Arc<Mutex<...>>).
struct SessionInner {
    container: Container,
    backend: Box<dyn ContainerBackend>,
}

impl SessionInner {
    /// Reload the metadata if the backend has moved past the cached copy.
    fn refresh(&mut self) -> CfsResult<()> {
        let generation = self.backend.generation()?;
        if generation == self.container.generation() {
            return Ok(());
        }
        let container = self.backend.load()?.ok_or(CfsError::NotMounted)?;
        container.check_layout(self.container.layout())?;
        debug!(
            "reloaded {} at generation {}",
            self.backend.describe(),
            generation
        );
        self.container = container;
        Ok(())
    }

    /// Commit a changed copy of the metadata and make it the cached one.
    fn commit(&mut self, mut next: Container) -> CfsResult<()> {
        next.set_generation(self.container.generation() + 1);
        if let Err(e) = self.backend.commit(&next) {
            warn!("commit to {} failed: {}", self.backend.describe(), e);
            return Err(e);
        }
        self.container = next;
        Ok(())
    }
}

/// A mounted frame store.
#[derive(Clone)]
pub struct Cfs {
    inner: Arc<Mutex<SessionInner>>,
    config: Arc<CfsConfig>,
    mounted: MountKind,
    cwd: String,
}

impl Cfs {
    /// Open the container held by `backend`, formatting a new one if the
    /// backend is empty. An existing container must match the configured
    /// layout.
    pub fn mount(mut backend: Box<dyn ContainerBackend>, config: CfsConfig) -> CfsResult<Self> {
        config.layout.validate()?;
        backend.lock(config.lock_timeout())?;
        let opened = Self::open_or_create(backend.as_mut(), config.layout);
        let released = backend.unlock();
        let (container, mounted) = opened?;
        released?;

        Ok(Self {
            inner: Arc::new(Mutex::new(SessionInner { container, backend })),
            config: Arc::new(config),
            mounted,
            cwd: "/".to_string(),
        })
    }

    fn open_or_create(
        backend: &mut dyn ContainerBackend,
        layout: Layout,
    ) -> CfsResult<(Container, MountKind)> {
        match backend.load()? {
            Some(container) => {
                container.check_layout(&layout)?;
                info!("mounted {}", backend.describe());
                Ok((container, MountKind::Opened))
            }
            None => {
                let mut container = Container::format(layout)?;
                container.set_generation(1);
                backend.commit(&container)?;
                info!("created {}", backend.describe());
                Ok((container, MountKind::Created))
            }
        }
    }

    /// A fresh container that lives only in memory.
    pub fn in_memory(layout: Layout) -> CfsResult<Self> {
        Self::mount(Box::new(MemoryBackend::new()), CfsConfig::with_layout(layout))
    }

    pub fn mount_kind(&self) -> MountKind {
        self.mounted
    }

    pub fn config(&self) -> &CfsConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.config.layout
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Parse a path (relative to the working directory) and fill in whether
    /// it exists.
    pub fn resolve(&self, path: &str) -> CfsResult<PathDescriptor> {
        let mut descriptor = self.parse(path)?;
        descriptor.exists = self.lookup(&descriptor)?.found;
        Ok(descriptor)
    }

    pub fn exists(&self, path: &str) -> CfsResult<Existence> {
        let descriptor = self.parse(path)?;
        self.lookup(&descriptor)
    }

    /// Create a directory directly under a volume.
    pub fn mkdir(&self, path: &str) -> CfsResult<()> {
        let descriptor = self.parse(path)?;
        match descriptor.kind() {
            PathKind::VolumeEntry => {}
            PathKind::DirectoryEntry => {
                return Err(CfsError::InvalidPathSyntax(format!(
                    "Cannot create directory '{}': subdirectories are not supported",
                    descriptor
                )))
            }
            PathKind::Root | PathKind::Volume => {
                return Err(CfsError::InvalidPathSyntax(format!(
                    "Cannot create directory '{}': invalid path",
                    descriptor
                )))
            }
        }

        self.transact(|inner| {
            if LookupEngine::new(inner.container.tree()).exists(&descriptor).found {
                return Err(CfsError::PathConflict(descriptor.to_string()));
            }
            let mut next = inner.container.clone();
            next.tree.create_directory(&descriptor)?;
            inner.commit(next)
        })
    }

    /// Create an empty file at volume root or inside a directory.
    pub fn touch(&self, path: &str) -> CfsResult<()> {
        let descriptor = self.parse(path)?;
        if descriptor.target.is_none() {
            return Err(CfsError::InvalidPathSyntax(format!(
                "Cannot create file '{}': invalid path",
                descriptor
            )));
        }

        let owner = self.config.owner.as_str();
        self.transact(|inner| {
            let lookup = LookupEngine::new(inner.container.tree());
            if lookup.exists(&descriptor).found {
                return Err(CfsError::PathConflict(descriptor.to_string()));
            }
            if descriptor.is_dir {
                return Err(CfsError::InvalidPathSyntax(format!(
                    "Cannot create file '{}': path specified is a directory",
                    descriptor
                )));
            }
            if let (Some(volume), Some(dir)) = (&descriptor.volume, &descriptor.directory) {
                if lookup.find_directory(volume, dir).is_none() {
                    return Err(CfsError::PathNotFound(format!("/{}/{}", volume, dir)));
                }
            }

            let mut next = inner.container.clone();
            let layout = *next.layout();
            next.tree.create_file(&descriptor, owner, &layout)?;
            inner.commit(next)
        })
    }

    /// List the root, a volume, or a directory. `None` lists the working
    /// directory.
    pub fn ls(&self, path: Option<&str>) -> CfsResult<Listing<'static>> {
        let descriptor = self.parse(path.unwrap_or(self.cwd.as_str()))?;
        self.transact(|inner| {
            let tree = inner.container.tree();
            Self::require_directory(&LookupEngine::new(tree), &descriptor)?;
            let entries: Vec<Entry> = tree
                .list_children(&descriptor, inner.container.layout())
                .collect();
            Ok(Listing::from_entries(entries))
        })
    }

    /// Change the working directory to the root, a volume, or a directory.
    pub fn cd(&mut self, path: &str) -> CfsResult<()> {
        let descriptor = self.parse(path)?;
        self.transact(|inner| {
            Self::require_directory(&LookupEngine::new(inner.container.tree()), &descriptor)
        })?;
        let mut cwd = PathDescriptor {
            is_dir: false,
            ..descriptor
        }
        .to_string();
        if !cwd.ends_with('/') {
            cwd.push('/');
        }
        self.cwd = cwd;
        Ok(())
    }

    /// Number of frames stored in a file.
    pub fn size(&self, path: &str) -> CfsResult<usize> {
        let descriptor = self.parse(path)?;
        self.transact(|inner| {
            let id = Self::require_file(&inner.container, &descriptor)?;
            sector_io::sector_count(&inner.container, id)
        })
    }

    /// Read 1-based frame `n` of a file.
    pub fn frame(&self, path: &str, n: usize) -> CfsResult<Frame> {
        let descriptor = self.parse(path)?;
        self.transact(|inner| {
            let id = Self::require_file(&inner.container, &descriptor)?;
            sector_io::read_frame(&inner.container, inner.backend.as_ref(), id, n)
        })
    }

    /// Append a frame to a file. Returns the new frame number.
    pub fn append_frame(&self, path: &str, frame: &Frame) -> CfsResult<usize> {
        let descriptor = self.parse(path)?;
        self.transact(|inner| {
            let id = Self::require_file(&inner.container, &descriptor)?;
            let mut next = inner.container.clone();
            let n = sector_io::append_frame(&mut next, inner.backend.as_mut(), id, frame)?;
            inner.commit(next)?;
            Ok(n)
        })
    }

    /// Used and free sectors across all volumes.
    pub fn free(&self) -> CfsResult<SpaceReport> {
        self.transact(|inner| {
            let allocator = inner.container.allocator();
            Ok(SpaceReport {
                used: allocator.used_sectors(),
                free: allocator.free_sectors(),
                total: allocator.total_capacity(),
            })
        })
    }

    /// Run a closure against an up-to-date copy of the container metadata.
    pub fn with_container<T>(&self, f: impl FnOnce(&Container) -> T) -> CfsResult<T> {
        self.transact(|inner| Ok(f(&inner.container)))
    }

    fn parse(&self, path: &str) -> CfsResult<PathDescriptor> {
        resolve(&absolutize(&self.cwd, path), self.layout())
    }

    fn require_directory(lookup: &LookupEngine<'_>, descriptor: &PathDescriptor) -> CfsResult<()> {
        let existence = lookup.exists(descriptor);
        if !existence.found {
            return Err(CfsError::PathNotFound(format!(
                "{}: directory does not exist",
                descriptor
            )));
        }
        if !existence.is_directory {
            return Err(CfsError::PathNotFound(format!(
                "{}: is not a directory",
                descriptor
            )));
        }
        Ok(())
    }

    fn require_file(container: &Container, descriptor: &PathDescriptor) -> CfsResult<InodeId> {
        let lookup = LookupEngine::new(container.tree());
        let existence = lookup.exists(descriptor);
        if existence.found && existence.is_directory {
            return Err(CfsError::PathNotFound(format!("{}: is a directory", descriptor)));
        }
        lookup
            .find_file(descriptor)
            .ok_or_else(|| CfsError::PathNotFound(format!("{}: file does not exist", descriptor)))
    }

    fn lookup(&self, descriptor: &PathDescriptor) -> CfsResult<Existence> {
        self.transact(|inner| Ok(LookupEngine::new(inner.container.tree()).exists(descriptor)))
    }

    /// Run one logical step under the session lock and the backend lock,
    /// against freshly refreshed metadata.
    fn transact<T>(&self, step: impl FnOnce(&mut SessionInner) -> CfsResult<T>) -> CfsResult<T> {
        let mut inner = self.session()?;
        inner.backend.lock(self.config.lock_timeout())?;
        let result = inner.refresh().and_then(|()| step(&mut *inner));
        if let Err(e) = inner.backend.unlock() {
            warn!("failed to unlock {}: {}", inner.backend.describe(), e);
        }
        result
    }

    fn session(&self) -> CfsResult<MutexGuard<'_, SessionInner>> {
        self.inner
            .try_lock_for(self.config.lock_timeout())
            .ok_or_else(|| {
                warn!("timed out waiting for session lock");
                CfsError::LockTimeout
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SectorStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// One store behind several sessions; commits fail while `failing` is set.
    #[derive(Clone, Default)]
    struct SharedBackend {
        store: Arc<Mutex<MemoryBackend>>,
        failing: Arc<AtomicBool>,
    }

    impl SectorStore for SharedBackend {
        fn read_sector(
            &self,
            layout: &Layout,
            volume: usize,
            sector: usize,
        ) -> CfsResult<Vec<i32>> {
            self.store.lock().read_sector(layout, volume, sector)
        }

        fn write_sector(
            &mut self,
            layout: &Layout,
            volume: usize,
            sector: usize,
            cells: &[i32],
        ) -> CfsResult<()> {
            self.store.lock().write_sector(layout, volume, sector, cells)
        }
    }

    impl ContainerBackend for SharedBackend {
        fn load(&self) -> CfsResult<Option<Container>> {
            self.store.lock().load()
        }

        fn generation(&self) -> CfsResult<u64> {
            self.store.lock().generation()
        }

        fn commit(&mut self, container: &Container) -> CfsResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CfsError::Io(std::io::Error::other("disk full")));
            }
            self.store.lock().commit(container)
        }

        fn lock(&mut self, _timeout: Duration) -> CfsResult<()> {
            Ok(())
        }

        fn unlock(&mut self) -> CfsResult<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "<shared>".to_string()
        }
    }

    fn small() -> Layout {
        Layout {
            volume_count: 2,
            sectors_per_volume: 4,
            sector_width: 2,
            sector_height: 2,
            max_dir_files: 3,
            ..Layout::default()
        }
    }

    fn cfs() -> Cfs {
        Cfs::in_memory(small()).unwrap()
    }

    #[test]
    fn test_mount_creates_then_opens() {
        let backend = MemoryBackend::new();
        let cfs = Cfs::mount(Box::new(backend), CfsConfig::with_layout(small())).unwrap();
        assert_eq!(cfs.mount_kind(), MountKind::Created);
        cfs.mkdir("/FV0/anim").unwrap();

        let image = cfs.with_container(|c| c.clone()).unwrap();
        let reopened = Cfs::mount(
            Box::new(MemoryBackend::with_container(image)),
            CfsConfig::with_layout(small()),
        )
        .unwrap();
        assert_eq!(reopened.mount_kind(), MountKind::Opened);
        assert!(reopened.exists("/FV0/anim").unwrap().is_directory);
    }

    #[test]
    fn test_mount_layout_mismatch() {
        let image = Container::format(small()).unwrap();
        let result = Cfs::mount(
            Box::new(MemoryBackend::with_container(image)),
            CfsConfig::default(),
        );
        assert!(matches!(result, Err(CfsError::LayoutMismatch(_))));
    }

    #[test]
    fn test_mkdir_rules() {
        let cfs = cfs();
        cfs.mkdir("/FV0/anim").unwrap();
        assert!(matches!(cfs.mkdir("/FV0/anim"), Err(CfsError::PathConflict(_))));
        assert!(matches!(cfs.mkdir("/FV0/anim/sub"), Err(CfsError::InvalidPathSyntax(_))));
        assert!(matches!(cfs.mkdir("/FV0"), Err(CfsError::InvalidPathSyntax(_))));
        assert!(matches!(cfs.mkdir("/FV9/x"), Err(CfsError::InvalidPathSyntax(_))));
    }

    #[test]
    fn test_touch_rules() {
        let cfs = cfs();
        cfs.mkdir("/FV0/anim").unwrap();
        cfs.touch("/FV0/anim/clip").unwrap();
        cfs.touch("/FV0/clip").unwrap();
        assert!(matches!(cfs.touch("/FV0/anim/clip"), Err(CfsError::PathConflict(_))));
        assert!(matches!(cfs.touch("/FV0/anim"), Err(CfsError::PathConflict(_))));
        assert!(matches!(cfs.touch("/FV0/newdir/"), Err(CfsError::InvalidPathSyntax(_))));
        assert!(matches!(cfs.touch("/FV0/missing/clip"), Err(CfsError::PathNotFound(_))));
        assert!(matches!(cfs.touch("/FV0"), Err(CfsError::InvalidPathSyntax(_))));
    }

    #[test]
    fn test_directory_full() {
        let cfs = cfs();
        cfs.mkdir("/FV0/d").unwrap();
        for name in ["a", "b", "c"] {
            cfs.touch(&format!("/FV0/d/{}", name)).unwrap();
        }
        assert!(matches!(cfs.touch("/FV0/d/e"), Err(CfsError::DirectoryFull(_))));
    }

    #[test]
    fn test_ls_requires_directory() {
        let cfs = cfs();
        cfs.touch("/FV1/file").unwrap();
        assert!(matches!(cfs.ls(Some("/FV1/file")), Err(CfsError::PathNotFound(_))));
        assert!(matches!(cfs.ls(Some("/FV1/nope")), Err(CfsError::PathNotFound(_))));
        assert_eq!(cfs.ls(Some("/")).unwrap().count(), 2);
        assert_eq!(cfs.ls(Some("/FV1")).unwrap().count(), 1);
    }

    #[test]
    fn test_cd_and_relative_paths() {
        let mut cfs = cfs();
        assert_eq!(cfs.cwd(), "/");
        cfs.cd("FV0").unwrap();
        assert_eq!(cfs.cwd(), "/FV0/");
        cfs.mkdir("anim").unwrap();
        cfs.cd("anim").unwrap();
        assert_eq!(cfs.cwd(), "/FV0/anim/");
        cfs.touch("clip").unwrap();
        assert!(cfs.exists("/FV0/anim/clip").unwrap().found);

        let names: Vec<_> = cfs.ls(None).unwrap().map(|e| e.name).collect();
        assert_eq!(names, vec!["clip".to_string()]);

        assert!(matches!(cfs.cd("clip"), Err(CfsError::PathNotFound(_))));
        assert_eq!(cfs.cwd(), "/FV0/anim/");
        cfs.cd("/").unwrap();
        assert_eq!(cfs.cwd(), "/");
    }

    #[test]
    fn test_append_size_frame() {
        let cfs = cfs();
        cfs.touch("/FV1/clip").unwrap();
        let a = Frame::from_cells(2, 2, vec![1, 0, 0, 1]).unwrap();
        let b = Frame::from_cells(2, 2, vec![0, 2, 2, 0]).unwrap();
        assert_eq!(cfs.append_frame("/FV1/clip", &a).unwrap(), 1);
        assert_eq!(cfs.append_frame("/FV1/clip", &b).unwrap(), 2);
        assert_eq!(cfs.size("/FV1/clip").unwrap(), 2);
        assert_eq!(cfs.frame("/FV1/clip", 2).unwrap(), b);
        assert!(matches!(
            cfs.frame("/FV1/clip", 3),
            Err(CfsError::InvalidFrame { frame: 3, count: 2 })
        ));
        assert_eq!(cfs.free().unwrap().used, 2);
    }

    #[test]
    fn test_file_ops_reject_directories() {
        let cfs = cfs();
        cfs.mkdir("/FV0/anim").unwrap();
        assert!(matches!(cfs.size("/FV0/anim"), Err(CfsError::PathNotFound(_))));
        assert!(matches!(cfs.size("/FV0/ghost"), Err(CfsError::PathNotFound(_))));
        assert!(matches!(
            cfs.append_frame("/FV0", &Frame::new(2, 2)),
            Err(CfsError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_clones_share_container() {
        let a = cfs();
        let mut b = a.clone();
        a.mkdir("/FV0/shared").unwrap();
        b.cd("/FV0/shared").unwrap();
        assert_eq!(a.cwd(), "/");
        assert!(b.exists("/FV0/shared").unwrap().found);
    }

    #[test]
    fn test_session_lock_times_out() {
        let config = CfsConfig {
            lock_timeout_ms: 10,
            ..CfsConfig::with_layout(small())
        };
        let cfs = Cfs::mount(Box::new(MemoryBackend::new()), config).unwrap();
        let guard = cfs.inner.lock();
        let started = std::time::Instant::now();
        assert!(matches!(cfs.mkdir("/FV0/x"), Err(CfsError::LockTimeout)));
        assert!(started.elapsed() >= Duration::from_millis(10));
        drop(guard);
        cfs.mkdir("/FV0/x").unwrap();
    }

    #[test]
    fn test_sessions_see_each_others_commits() {
        let shared = SharedBackend::default();
        let config = CfsConfig::with_layout(small());
        let a = Cfs::mount(Box::new(shared.clone()), config.clone()).unwrap();
        let b = Cfs::mount(Box::new(shared.clone()), config).unwrap();
        assert_eq!(b.mount_kind(), MountKind::Opened);

        let first = Frame::from_cells(2, 2, vec![1, 0, 0, 1]).unwrap();
        let second = Frame::from_cells(2, 2, vec![0, 3, 3, 0]).unwrap();
        a.touch("/FV0/clip").unwrap();
        b.mkdir("/FV1/anim").unwrap();
        assert_eq!(a.append_frame("/FV0/clip", &first).unwrap(), 1);
        assert_eq!(b.append_frame("/FV0/clip", &second).unwrap(), 2);

        assert!(a.exists("/FV1/anim").unwrap().is_directory);
        assert_eq!(a.size("/FV0/clip").unwrap(), 2);
        assert_eq!(a.frame("/FV0/clip", 2).unwrap(), second);
        assert_eq!(a.free().unwrap().used, 2);
        assert_eq!(shared.store.lock().commit_count(), 5);
    }

    #[test]
    fn test_failed_commit_leaves_session_unchanged() {
        let shared = SharedBackend::default();
        let cfs = Cfs::mount(Box::new(shared.clone()), CfsConfig::with_layout(small())).unwrap();
        cfs.touch("/FV0/clip").unwrap();
        let frame = Frame::from_cells(2, 2, vec![1, 1, 0, 0]).unwrap();

        shared.failing.store(true, Ordering::SeqCst);
        assert!(matches!(cfs.append_frame("/FV0/clip", &frame), Err(CfsError::Io(_))));
        assert!(matches!(cfs.mkdir("/FV1/anim"), Err(CfsError::Io(_))));
        assert_eq!(cfs.size("/FV0/clip").unwrap(), 0);
        assert_eq!(cfs.free().unwrap().used, 0);
        assert!(!cfs.exists("/FV1/anim").unwrap().found);

        shared.failing.store(false, Ordering::SeqCst);
        assert_eq!(cfs.append_frame("/FV0/clip", &frame).unwrap(), 1);
        assert_eq!(cfs.frame("/FV0/clip", 1).unwrap(), frame);
        assert_eq!(cfs.free().unwrap().used, 1);
    }
}
