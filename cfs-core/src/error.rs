//! Error types for the frame store.

use thiserror::Error;

/// Errors that can occur during frame store operations.
#[derive(Error, Debug)]
pub enum CfsError {
    #[error("{0}")]
    InvalidPathSyntax(String),

    #[error("Path already exists: {0}")]
    PathConflict(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Volume {volume} is out of space")]
    OutOfSpace { volume: String },

    #[error("Invalid frame {frame}: file only has {count} frames")]
    InvalidFrame { frame: usize, count: usize },

    #[error("File is full: {0}")]
    FileFull(String),

    #[error("Directory is full: {0}")]
    DirectoryFull(String),

    #[error("Frame must be {expected_width}x{expected_height}, got {width}x{height}")]
    FrameShape {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },

    #[error("Invalid frame data: {0}")]
    InvalidWire(String),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Container layout does not match: {0}")]
    LayoutMismatch(String),

    #[error("Corrupt container: {0}")]
    Corrupt(String),

    #[error("Timed out waiting for container lock")]
    LockTimeout,

    #[error("No mounted filesystem")]
    NotMounted,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for frame store operations.
pub type CfsResult<T> = Result<T, CfsError>;
