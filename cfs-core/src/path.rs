//! Absolute path grammar.
//!
//! ```text
//! path      := "/" volume ("/" dirOrFile ("/" file)? )?
//! volume    := "FV" digits            ; digits < volumeCount
//! ```
//!
//! Parsing only checks shape and volume validity. Whether `/FVn/x` names a
//! file or a directory is decided later by lookup; a trailing `/` records
//! directory intent.

use std::fmt;

use crate::error::{CfsError, CfsResult};
use crate::layout::{Layout, VOLUME_PREFIX};

/// Structured location produced by [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathDescriptor {
    pub volume: Option<String>,
    pub directory: Option<String>,
    pub target: Option<String>,
    /// Path ended with `/` (or names the root or a volume).
    pub is_dir: bool,
    /// Filled in by lookup; always false straight out of the parser.
    pub exists: bool,
}

/// What a descriptor points at, by shape alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Root,
    Volume,
    /// `/FVn/x`: a directory or a root-level file.
    VolumeEntry,
    /// `/FVn/d/x`: a file inside a directory.
    DirectoryEntry,
}

impl PathDescriptor {
    pub fn root() -> Self {
        Self {
            is_dir: true,
            ..Self::default()
        }
    }

    pub fn volume(volume: impl Into<String>) -> Self {
        Self {
            volume: Some(volume.into()),
            is_dir: true,
            ..Self::default()
        }
    }

    /// `/volume/target`
    pub fn entry(volume: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            volume: Some(volume.into()),
            target: Some(target.into()),
            ..Self::default()
        }
    }

    /// `/volume/directory/target`
    pub fn in_directory(
        volume: impl Into<String>,
        directory: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            volume: Some(volume.into()),
            directory: Some(directory.into()),
            target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> PathKind {
        match (&self.volume, &self.directory, &self.target) {
            (None, _, _) => PathKind::Root,
            (Some(_), _, None) => PathKind::Volume,
            (Some(_), None, Some(_)) => PathKind::VolumeEntry,
            (Some(_), Some(_), Some(_)) => PathKind::DirectoryEntry,
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind() == PathKind::Root
    }

    pub fn volume_name(&self) -> Option<&str> {
        self.volume.as_deref()
    }

    pub fn directory_name(&self) -> Option<&str> {
        self.directory.as_deref()
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

impl fmt::Display for PathDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(volume) = &self.volume else {
            return write!(f, "/");
        };
        write!(f, "/{}", volume)?;
        if let Some(directory) = &self.directory {
            write!(f, "/{}", directory)?;
        }
        if let Some(target) = &self.target {
            write!(f, "/{}", target)?;
            if self.is_dir && self.directory.is_none() {
                write!(f, "/")?;
            }
        }
        Ok(())
    }
}

/// Parse and validate an absolute path against a layout.
pub fn resolve(path: &str, layout: &Layout) -> CfsResult<PathDescriptor> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| CfsError::InvalidPathSyntax("Invalid path".to_string()))?;

    if rest.is_empty() {
        return Ok(PathDescriptor::root());
    }

    let trailing_slash = rest.ends_with('/');
    let body = rest.strip_suffix('/').unwrap_or(rest);
    let parts: Vec<&str> = body.split('/').collect();

    if parts.iter().any(|p| p.is_empty()) {
        return Err(CfsError::InvalidPathSyntax("Invalid path".to_string()));
    }

    let volume = parse_volume(parts[0], layout)?;

    match parts.len() {
        1 => Ok(PathDescriptor::volume(volume)),
        2 => Ok(PathDescriptor {
            is_dir: trailing_slash,
            ..PathDescriptor::entry(volume, parts[1])
        }),
        3 if !trailing_slash => Ok(PathDescriptor::in_directory(volume, parts[1], parts[2])),
        _ => Err(CfsError::InvalidPathSyntax(
            "Path cannot specify a subdirectory".to_string(),
        )),
    }
}

/// Join a possibly relative path onto the current working directory.
pub fn absolutize(cwd: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else if cwd.ends_with('/') {
        format!("{}{}", cwd, path)
    } else {
        format!("{}/{}", cwd, path)
    }
}

fn parse_volume(token: &str, layout: &Layout) -> CfsResult<String> {
    let digits = token
        .strip_prefix(VOLUME_PREFIX)
        .ok_or_else(|| CfsError::InvalidPathSyntax("Invalid volume name".to_string()))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CfsError::InvalidPathSyntax(
            "Invalid volume specified".to_string(),
        ));
    }
    match digits.parse::<usize>() {
        Ok(index) if index < layout.volume_count => Ok(layout.volume_name(index)),
        _ => Err(CfsError::InvalidPathSyntax(
            "Invalid volume number specified".to_string(),
        )),
    }
}
