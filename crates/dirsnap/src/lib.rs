//! dirsnap - directory snapshots and change detection.
//!
//! This library records the state of a directory tree as a [`Snapshot`] and
//! compares two snapshots into a [`Diff`] of created, deleted, modified and
//! moved files and directories. Entries are tracked by inode and volume, so
//! renames are reported as moves.

pub mod capture;
pub mod diff;
pub mod error;
mod path_serde;
pub mod snapshot;
pub mod source;
pub mod store;

pub use capture::{Capture, CaptureGuard, Captured, Finished};
pub use diff::{Diff, DiffCounts};
pub use error::{SnapshotError, StoreError};
pub use snapshot::Snapshot;
pub use source::{
    EntryKind, FnSource, Identity, ListEntry, MemorySource, OsSource, Source, StatRecord,
};
pub use store::{DEFAULT_COMPRESSION_LEVEL, SnapshotFile, Volume};
