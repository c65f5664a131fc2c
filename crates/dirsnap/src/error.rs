use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to build a snapshot.
///
/// Entries that vanish, change type or deny access during the walk are not
/// errors; they are left out of the snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot stat snapshot root {path:?}: {source}")]
    Root { path: PathBuf, source: io::Error },

    #[error("snapshot root {0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("cannot list {path:?}: {source}")]
    Walk { path: PathBuf, source: io::Error },
}

/// Failure to read or write a snapshot file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid snapshot file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot file version {0}")]
    UnsupportedVersion(u32),
}
