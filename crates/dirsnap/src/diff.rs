//! Classification of changes between two snapshots.
//!
//! Entries are matched by identity rather than by path, which is what lets
//! renames show up as moves instead of a deletion plus a creation:
//!
//! - a path only in the new snapshot is created, only in the reference is
//!   deleted;
//! - a path in both whose identity (or kind) changed was replaced, and is
//!   both deleted and created;
//! - a deleted or created entry whose identity exists under another path on
//!   the other side was moved;
//! - an entry that kept its identity but changed mtime or size was modified.
//!   For moved entries the *old* path is reported as modified.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Sub;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::path_serde;
use crate::snapshot::Snapshot;
use crate::source::StatRecord;

/// Changes between a reference snapshot and a newer one, split into files
/// and directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    #[serde(serialize_with = "path_serde::set::serialize")]
    files_created: BTreeSet<PathBuf>,
    #[serde(serialize_with = "path_serde::set::serialize")]
    files_deleted: BTreeSet<PathBuf>,
    #[serde(serialize_with = "path_serde::set::serialize")]
    files_modified: BTreeSet<PathBuf>,
    #[serde(serialize_with = "path_serde::pairs::serialize")]
    files_moved: BTreeSet<(PathBuf, PathBuf)>,
    #[serde(serialize_with = "path_serde::set::serialize")]
    dirs_created: BTreeSet<PathBuf>,
    #[serde(serialize_with = "path_serde::set::serialize")]
    dirs_deleted: BTreeSet<PathBuf>,
    #[serde(serialize_with = "path_serde::set::serialize")]
    dirs_modified: BTreeSet<PathBuf>,
    #[serde(serialize_with = "path_serde::pairs::serialize")]
    dirs_moved: BTreeSet<(PathBuf, PathBuf)>,
}

/// Number of entries in each bucket of a [`Diff`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub files_created: usize,
    pub files_deleted: usize,
    pub files_modified: usize,
    pub files_moved: usize,
    pub dirs_created: usize,
    pub dirs_deleted: usize,
    pub dirs_modified: usize,
    pub dirs_moved: usize,
}

impl DiffCounts {
    pub fn total(&self) -> usize {
        self.files_created
            + self.files_deleted
            + self.files_modified
            + self.files_moved
            + self.dirs_created
            + self.dirs_deleted
            + self.dirs_modified
            + self.dirs_moved
    }
}

/// Key used to match entries across snapshots.
///
/// With `ignore_volume`, only the inode number takes part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    ino: u64,
    dev: Option<u64>,
}

impl Key {
    fn of(stat: &StatRecord, ignore_volume: bool) -> Self {
        Self {
            ino: stat.ino,
            dev: (!ignore_volume).then_some(stat.dev),
        }
    }
}

/// Finds where an identity lives in one snapshot.
enum Locator<'a> {
    Identity(&'a Snapshot),
    Inode {
        snapshot: &'a Snapshot,
        by_inode: HashMap<u64, &'a Path>,
    },
}

impl<'a> Locator<'a> {
    fn new(snapshot: &'a Snapshot, ignore_volume: bool) -> Self {
        if !ignore_volume {
            return Self::Identity(snapshot);
        }
        let mut by_inode = HashMap::with_capacity(snapshot.len());
        for (path, stat) in snapshot.entries() {
            by_inode.entry(stat.ino).or_insert(path);
        }
        Self::Inode { snapshot, by_inode }
    }

    fn find(&self, stat: &StatRecord) -> Option<(&'a Path, &'a StatRecord)> {
        let (snapshot, path): (&'a Snapshot, &'a Path) = match *self {
            Self::Identity(snapshot) => (snapshot, snapshot.path(stat.identity())?),
            Self::Inode {
                snapshot,
                ref by_inode,
            } => (snapshot, *by_inode.get(&stat.ino)?),
        };
        Some((path, snapshot.stat(path)?))
    }
}

impl Diff {
    /// Compare `snapshot` against `reference`, matching on inode and volume.
    pub fn new(reference: &Snapshot, snapshot: &Snapshot) -> Self {
        Self::compare(reference, snapshot, false)
    }

    /// Compare `snapshot` against `reference`.
    ///
    /// With `ignore_volume`, entries are matched on inode number alone, for
    /// platforms where volume ids don't survive a reboot.
    pub fn compare(reference: &Snapshot, snapshot: &Snapshot, ignore_volume: bool) -> Self {
        let replaced = |old: &StatRecord, new: &StatRecord| {
            Key::of(old, ignore_volume) != Key::of(new, ignore_volume)
                || old.is_dir() != new.is_dir()
        };

        let mut created: BTreeMap<&Path, &StatRecord> = BTreeMap::new();
        let mut deleted: BTreeMap<&Path, &StatRecord> = BTreeMap::new();
        let mut modified: BTreeMap<&Path, bool> = BTreeMap::new();
        let mut moved: BTreeMap<(&Path, &Path), (&StatRecord, &StatRecord)> = BTreeMap::new();

        for (path, new) in snapshot.entries() {
            match reference.stat(path) {
                None => {
                    created.insert(path, new);
                }
                Some(old) if replaced(old, new) => {
                    created.insert(path, new);
                    deleted.insert(path, old);
                }
                Some(old) => {
                    if old.content_differs(new) {
                        modified.insert(path, old.is_dir());
                    }
                }
            }
        }
        for (path, old) in reference.entries() {
            if !snapshot.contains(path) {
                deleted.insert(path, old);
            }
        }

        let in_new = Locator::new(snapshot, ignore_volume);
        deleted.retain(|&old_path, old| match in_new.find(old) {
            Some((new_path, new)) if new_path != old_path && old.is_dir() == new.is_dir() => {
                moved.insert((old_path, new_path), (*old, new));
                false
            }
            _ => true,
        });

        let in_reference = Locator::new(reference, ignore_volume);
        created.retain(|&new_path, new| match in_reference.find(new) {
            Some((old_path, old)) if old_path != new_path && old.is_dir() == new.is_dir() => {
                moved.insert((old_path, new_path), (old, *new));
                false
            }
            _ => true,
        });

        for (&(old_path, _), (old, new)) in &moved {
            if old.content_differs(new) {
                modified.insert(old_path, old.is_dir());
            }
        }

        let mut diff = Self::default();
        for (path, stat) in created {
            let bucket = if stat.is_dir() {
                &mut diff.dirs_created
            } else {
                &mut diff.files_created
            };
            bucket.insert(path.to_path_buf());
        }
        for (path, stat) in deleted {
            let bucket = if stat.is_dir() {
                &mut diff.dirs_deleted
            } else {
                &mut diff.files_deleted
            };
            bucket.insert(path.to_path_buf());
        }
        for (path, is_dir) in modified {
            let bucket = if is_dir {
                &mut diff.dirs_modified
            } else {
                &mut diff.files_modified
            };
            bucket.insert(path.to_path_buf());
        }
        for ((old_path, new_path), (old, _)) in moved {
            let bucket = if old.is_dir() {
                &mut diff.dirs_moved
            } else {
                &mut diff.files_moved
            };
            bucket.insert((old_path.to_path_buf(), new_path.to_path_buf()));
        }

        debug!(ignore_volume, %diff, "Snapshots compared");
        diff
    }

    pub fn files_created(&self) -> &BTreeSet<PathBuf> {
        &self.files_created
    }

    pub fn files_deleted(&self) -> &BTreeSet<PathBuf> {
        &self.files_deleted
    }

    pub fn files_modified(&self) -> &BTreeSet<PathBuf> {
        &self.files_modified
    }

    /// Moved files as (old path, new path) pairs.
    pub fn files_moved(&self) -> &BTreeSet<(PathBuf, PathBuf)> {
        &self.files_moved
    }

    pub fn dirs_created(&self) -> &BTreeSet<PathBuf> {
        &self.dirs_created
    }

    pub fn dirs_deleted(&self) -> &BTreeSet<PathBuf> {
        &self.dirs_deleted
    }

    pub fn dirs_modified(&self) -> &BTreeSet<PathBuf> {
        &self.dirs_modified
    }

    /// Moved directories as (old path, new path) pairs.
    pub fn dirs_moved(&self) -> &BTreeSet<(PathBuf, PathBuf)> {
        &self.dirs_moved
    }

    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            files_created: self.files_created.len(),
            files_deleted: self.files_deleted.len(),
            files_modified: self.files_modified.len(),
            files_moved: self.files_moved.len(),
            dirs_created: self.dirs_created.len(),
            dirs_deleted: self.dirs_deleted.len(),
            dirs_modified: self.dirs_modified.len(),
            dirs_moved: self.dirs_moved.len(),
        }
    }

    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.counts();
        write!(
            f,
            "files(created={}, deleted={}, modified={}, moved={}) \
             dirs(created={}, deleted={}, modified={}, moved={})",
            c.files_created,
            c.files_deleted,
            c.files_modified,
            c.files_moved,
            c.dirs_created,
            c.dirs_deleted,
            c.dirs_modified,
            c.dirs_moved
        )
    }
}

/// `&new - &reference` compares the two with default options.
impl Sub<&Snapshot> for &Snapshot {
    type Output = Diff;

    fn sub(self, reference: &Snapshot) -> Diff {
        Diff::new(reference, self)
    }
}
