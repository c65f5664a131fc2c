//! Point-in-time record of a directory tree.
//!
//! A [`Snapshot`] maps every path reachable from a root to its
//! [`StatRecord`], and every [`Identity`] back to its path. It is built by a
//! best-effort walk: the filesystem may change while it is being read, and
//! entries that disappear or refuse access are left out rather than failing
//! the whole snapshot.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::SnapshotError;
use crate::source::{Identity, ListEntry, OsSource, Source, StatRecord};

/// Paths and metadata captured from one walk of a directory tree.
///
/// Each identity appears at most once. When two paths share an identity
/// (hard links, or a followed symlink to an already seen directory), the
/// first one reached is kept and the others are omitted.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    root: Option<PathBuf>,
    recursive: bool,
    stats: BTreeMap<PathBuf, StatRecord>,
    by_identity: HashMap<Identity, PathBuf>,
}

impl Snapshot {
    /// Recursively snapshot `root` on the real filesystem, without following
    /// symbolic links.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        Self::capture(root, true, &OsSource::new())
    }

    /// A snapshot with no paths at all.
    ///
    /// Diffing against it reports everything in the other snapshot as created.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Walk `root` through `source`.
    ///
    /// Without `recursive`, the immediate children of the root are recorded
    /// but subdirectories are not descended into. Children are visited in
    /// name order. Fails only if the root can't be stat'd, isn't a
    /// directory, or a listing fails for a reason other than the directory
    /// vanishing or denying access.
    pub fn capture<S>(
        root: impl AsRef<Path>,
        recursive: bool,
        source: &S,
    ) -> Result<Self, SnapshotError>
    where
        S: Source + ?Sized,
    {
        let root = root.as_ref().to_path_buf();
        let root_stat = source.stat(&root).map_err(|source| SnapshotError::Root {
            path: root.clone(),
            source,
        })?;
        if !root_stat.is_dir() {
            return Err(SnapshotError::NotADirectory(root));
        }

        let mut snapshot = Self {
            root: Some(root.clone()),
            recursive,
            ..Self::default()
        };
        snapshot.record(root.clone(), root_stat);

        let mut skipped = 0usize;
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let entries = match source.list_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if is_vanished(&err) => {
                    debug!(?dir, %err, "Directory vanished during walk");
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                    debug!(?dir, %err, "Not descending into directory");
                    continue;
                }
                Err(source) => return Err(SnapshotError::Walk { path: dir, source }),
            };

            let mut children: Vec<ListEntry> = Vec::new();
            for entry in entries {
                match entry {
                    Ok(entry) => children.push(entry),
                    Err(err) => {
                        trace!(?dir, %err, "Skipping unreadable entry");
                        skipped += 1;
                    }
                }
            }
            children.sort_by(|a, b| a.name.cmp(&b.name));

            // Pushed in reverse so the stack pops them in name order.
            let mut subdirs = Vec::new();
            for child in children {
                let path = dir.join(&child.name);
                let stat = match source.stat(&path) {
                    Ok(stat) => stat,
                    Err(err) => {
                        trace!(?path, %err, "Skipping entry that failed to stat");
                        skipped += 1;
                        continue;
                    }
                };
                if let Some(kind) = child.kind
                    && kind.is_dir() != stat.is_dir()
                {
                    trace!(?path, ?kind, "Entry changed type since it was listed");
                }
                if !snapshot.record(path.clone(), stat) {
                    continue;
                }
                if recursive && stat.is_dir() {
                    subdirs.push(path);
                }
            }
            pending.extend(subdirs.into_iter().rev());
        }

        debug!(
            root = ?snapshot.root,
            entries = snapshot.len(),
            skipped,
            "Snapshot captured"
        );
        Ok(snapshot)
    }

    /// Rebuild a snapshot from previously captured records.
    pub(crate) fn from_records(
        root: Option<PathBuf>,
        recursive: bool,
        records: impl IntoIterator<Item = (PathBuf, StatRecord)>,
    ) -> Self {
        let mut snapshot = Self {
            root,
            recursive,
            ..Self::default()
        };
        for (path, stat) in records {
            snapshot.record(path, stat);
        }
        snapshot
    }

    /// Returns false, recording nothing, if the identity is already taken.
    fn record(&mut self, path: PathBuf, stat: StatRecord) -> bool {
        match self.by_identity.entry(stat.identity()) {
            Entry::Occupied(existing) => {
                debug!(?path, existing = ?existing.get(), "Identity already recorded, omitting");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(path.clone());
                self.stats.insert(path, stat);
                true
            }
        }
    }

    /// The walked root, or `None` for [`Snapshot::empty`].
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Number of captured paths.
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// All captured paths, in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.stats.keys().map(PathBuf::as_path)
    }

    /// All captured paths with their records, in sorted path order.
    pub fn entries(&self) -> impl Iterator<Item = (&Path, &StatRecord)> {
        self.stats.iter().map(|(path, stat)| (path.as_path(), stat))
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.stats.contains_key(path.as_ref())
    }

    /// The path recorded for an identity.
    pub fn path(&self, identity: Identity) -> Option<&Path> {
        self.by_identity.get(&identity).map(PathBuf::as_path)
    }

    pub fn identity(&self, path: impl AsRef<Path>) -> Option<Identity> {
        self.stat(path).map(StatRecord::identity)
    }

    pub fn stat(&self, path: impl AsRef<Path>) -> Option<&StatRecord> {
        self.stats.get(path.as_ref())
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> Option<bool> {
        self.stat(path).map(StatRecord::is_dir)
    }

    pub fn mtime(&self, path: impl AsRef<Path>) -> Option<f64> {
        self.stat(path).map(|stat| stat.mtime)
    }

    pub fn size(&self, path: impl AsRef<Path>) -> Option<u64> {
        self.stat(path).map(|stat| stat.size)
    }
}

fn is_vanished(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::InvalidInput
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, S_IFREG};

    fn tree() -> MemorySource {
        MemorySource::new()
            .dir("/a", 1)
            .file("/a/f1", 10, 100, 1000.0)
            .dir("/a/sub", 20)
            .file("/a/sub/f2", 11, 50, 1001.0)
            .dir("/a/sub/deeper", 21)
            .file("/a/sub/deeper/f3", 12, 5, 1002.0)
    }

    fn paths(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.paths().map(|p| p.to_str().unwrap()).collect()
    }

    #[test]
    fn captures_whole_tree() {
        let snapshot = Snapshot::capture("/a", true, &tree()).unwrap();
        assert_eq!(
            paths(&snapshot),
            vec![
                "/a",
                "/a/f1",
                "/a/sub",
                "/a/sub/deeper",
                "/a/sub/deeper/f3",
                "/a/sub/f2"
            ]
        );
        assert_eq!(snapshot.root(), Some(Path::new("/a")));
        assert_eq!(snapshot.size("/a/f1"), Some(100));
        assert_eq!(snapshot.mtime("/a/sub/f2"), Some(1001.0));
        assert_eq!(snapshot.is_dir("/a/sub"), Some(true));
        assert_eq!(snapshot.is_dir("/a/f1"), Some(false));
        assert_eq!(snapshot.is_dir("/a/missing"), None);
    }

    #[test]
    fn identity_index_is_inverse() {
        let snapshot = Snapshot::capture("/a", true, &tree()).unwrap();
        for path in snapshot.paths() {
            let identity = snapshot.identity(path).unwrap();
            assert_eq!(snapshot.path(identity), Some(path));
        }
        assert_eq!(snapshot.path(Identity::new(10, 1)), Some(Path::new("/a/f1")));
        assert_eq!(snapshot.path(Identity::new(10, 2)), None);
        assert_eq!(snapshot.path(Identity::new(999, 1)), None);
    }

    #[test]
    fn parents_are_captured() {
        let snapshot = Snapshot::capture("/a", true, &tree()).unwrap();
        for path in snapshot.paths().filter(|p| *p != Path::new("/a")) {
            assert!(snapshot.contains(path.parent().unwrap()), "{path:?}");
        }
    }

    #[test]
    fn empty_root_contains_only_root() {
        let source = MemorySource::new().dir("/a", 1);
        let snapshot = Snapshot::capture("/a", true, &source).unwrap();
        assert_eq!(paths(&snapshot), vec!["/a"]);
    }

    #[test]
    fn non_recursive_stops_at_first_level() {
        let snapshot = Snapshot::capture("/a", false, &tree()).unwrap();
        assert_eq!(paths(&snapshot), vec!["/a", "/a/f1", "/a/sub"]);
        assert!(!snapshot.is_recursive());
    }

    #[test]
    fn root_must_stat() {
        let source = MemorySource::new();
        let err = Snapshot::capture("/a", true, &source).unwrap_err();
        assert!(matches!(err, SnapshotError::Root { .. }), "{err}");
    }

    #[test]
    fn root_must_be_directory() {
        let source = MemorySource::new().file("/a", 1, 0, 0.0);
        let err = Snapshot::capture("/a", true, &source).unwrap_err();
        assert!(matches!(err, SnapshotError::NotADirectory(_)), "{err}");
    }

    #[test]
    fn vanished_directory_is_empty() {
        for kind in [
            io::ErrorKind::NotFound,
            io::ErrorKind::NotADirectory,
            io::ErrorKind::InvalidInput,
        ] {
            let source = tree().fail_list("/a/sub", kind);
            let snapshot = Snapshot::capture("/a", true, &source).unwrap();
            assert_eq!(paths(&snapshot), vec!["/a", "/a/f1", "/a/sub"], "{kind:?}");
        }
    }

    #[test]
    fn denied_directory_is_recorded_without_children() {
        let source = tree().fail_list("/a/sub", io::ErrorKind::PermissionDenied);
        let snapshot = Snapshot::capture("/a", true, &source).unwrap();
        assert_eq!(paths(&snapshot), vec!["/a", "/a/f1", "/a/sub"]);
    }

    #[test]
    fn denied_root_listing_gives_root_only() {
        let source = tree().fail_list("/a", io::ErrorKind::PermissionDenied);
        let snapshot = Snapshot::capture("/a", true, &source).unwrap();
        assert_eq!(paths(&snapshot), vec!["/a"]);
    }

    #[test]
    fn failed_child_stat_is_skipped() {
        let source = tree().fail_stat("/a/sub", io::ErrorKind::NotFound);
        let snapshot = Snapshot::capture("/a", true, &source).unwrap();
        assert_eq!(paths(&snapshot), vec!["/a", "/a/f1"]);
    }

    #[test]
    fn unexpected_listing_error_is_fatal() {
        let source = tree().fail_list("/a/sub", io::ErrorKind::Other);
        let err = Snapshot::capture("/a", true, &source).unwrap_err();
        match err {
            SnapshotError::Walk { path, .. } => assert_eq!(path, Path::new("/a/sub")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn hard_link_keeps_first_path() {
        let linked = StatRecord {
            dev: 1,
            ino: 10,
            mode: S_IFREG | 0o644,
            mtime: 1.0,
            size: 3,
        };
        let source = MemorySource::new()
            .dir("/a", 1)
            .entry("/a/b", linked)
            .entry("/a/a", linked);
        let snapshot = Snapshot::capture("/a", true, &source).unwrap();
        assert_eq!(paths(&snapshot), vec!["/a", "/a/a"]);
        assert_eq!(snapshot.path(linked.identity()), Some(Path::new("/a/a")));
    }

    #[test]
    fn empty_snapshot_knows_nothing() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.root(), None);
        assert_eq!(snapshot.path(Identity::new(1, 1)), None);
        assert_eq!(snapshot.identity("/a"), None);
    }
}
