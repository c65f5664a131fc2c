//! Filesystem primitives used to build snapshots.
//!
//! Snapshot construction never touches the filesystem directly. It goes
//! through a [`Source`], which supplies a stat function and a directory
//! listing function. [`OsSource`] reads the real filesystem, [`FnSource`]
//! adapts a pair of closures, and [`MemorySource`] is an in-memory tree
//! that can also simulate failures.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs::{self, FileType, Metadata};
use std::io;
use std::marker::PhantomData;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Bit mask for the file type bits of `st_mode`.
pub const S_IFMT: u32 = 0o170000;
/// Directory file type.
pub const S_IFDIR: u32 = 0o040000;
/// Regular file type.
pub const S_IFREG: u32 = 0o100000;
/// Symbolic link file type.
pub const S_IFLNK: u32 = 0o120000;

/// The metadata retained for every captured path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    /// Device (volume) the entry lives on.
    pub dev: u64,
    pub ino: u64,
    /// POSIX mode bits, including the file type.
    pub mode: u32,
    /// Modification time in seconds since the epoch.
    pub mtime: f64,
    pub size: u64,
}

impl StatRecord {
    /// The (inode, volume) pair naming this entry.
    pub fn identity(&self) -> Identity {
        Identity::new(self.ino, self.dev)
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// True if modification time or size differ.
    pub fn content_differs(&self, other: &StatRecord) -> bool {
        self.mtime != other.mtime || self.size != other.size
    }
}

impl From<&Metadata> for StatRecord {
    fn from(metadata: &Metadata) -> Self {
        let mtime = metadata.mtime() as f64 + metadata.mtime_nsec() as f64 / 1e9;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
            mode: metadata.mode(),
            mtime,
            size: metadata.size(),
        }
    }
}

/// Identity of a filesystem entry: the inode number and the volume it is on.
///
/// Inode numbers are only unique within a volume, so both are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub ino: u64,
    pub dev: u64,
}

impl Identity {
    pub fn new(ino: u64, dev: u64) -> Self {
        Self { ino, dev }
    }
}

/// Type hint attached to a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    Other,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        self == Self::Dir
    }

    fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => Self::Dir,
            S_IFREG => Self::File,
            S_IFLNK => Self::Symlink,
            _ => Self::Other,
        }
    }
}

impl From<FileType> for EntryKind {
    fn from(file_type: FileType) -> Self {
        if file_type.is_dir() {
            Self::Dir
        } else if file_type.is_file() {
            Self::File
        } else if file_type.is_symlink() {
            Self::Symlink
        } else {
            Self::Other
        }
    }
}

/// One entry returned by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// File name relative to the listed directory.
    pub name: OsString,
    /// What the listing believed the entry to be, if it said.
    pub kind: Option<EntryKind>,
}

impl ListEntry {
    pub fn new(name: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// The stat and listdir primitives a snapshot is built from.
///
/// Listing errors of kind `NotFound`, `NotADirectory` or `InvalidInput` mean
/// the directory vanished or changed type, and `PermissionDenied` means it
/// can't be descended into. The returned iterator is consumed exactly once.
pub trait Source {
    type Entries: Iterator<Item = io::Result<ListEntry>>;

    /// Stat a single path.
    fn stat(&self, path: &Path) -> io::Result<StatRecord>;

    /// List the entries of a directory.
    fn list_dir(&self, path: &Path) -> io::Result<Self::Entries>;
}

impl<S: Source + ?Sized> Source for &S {
    type Entries = S::Entries;

    fn stat(&self, path: &Path) -> io::Result<StatRecord> {
        (**self).stat(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Self::Entries> {
        (**self).list_dir(path)
    }
}

/// The real filesystem, through `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSource {
    follow_symlinks: bool,
}

impl OsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stat through symbolic links instead of recording the links themselves.
    ///
    /// Linked directories are then descended into, once per identity.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }
}

impl Source for OsSource {
    type Entries = OsEntries;

    fn stat(&self, path: &Path) -> io::Result<StatRecord> {
        let metadata = if self.follow_symlinks {
            fs::metadata(path)?
        } else {
            fs::symlink_metadata(path)?
        };
        Ok(StatRecord::from(&metadata))
    }

    fn list_dir(&self, path: &Path) -> io::Result<Self::Entries> {
        Ok(OsEntries(fs::read_dir(path)?))
    }
}

/// Directory listing iterator for [`OsSource`].
#[derive(Debug)]
pub struct OsEntries(fs::ReadDir);

impl Iterator for OsEntries {
    type Item = io::Result<ListEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.0.next()? {
            Ok(entry) => entry,
            Err(err) => return Some(Err(err)),
        };
        Some(Ok(ListEntry {
            kind: entry.file_type().ok().map(EntryKind::from),
            name: entry.file_name(),
        }))
    }
}

/// A [`Source`] built from a stat closure and a listing closure.
pub struct FnSource<S, L, I> {
    stat: S,
    list: L,
    _entries: PhantomData<fn() -> I>,
}

impl<S, L, I> FnSource<S, L, I>
where
    S: Fn(&Path) -> io::Result<StatRecord>,
    L: Fn(&Path) -> io::Result<I>,
    I: IntoIterator<Item = io::Result<ListEntry>>,
{
    pub fn new(stat: S, list: L) -> Self {
        Self {
            stat,
            list,
            _entries: PhantomData,
        }
    }
}

impl<S, L, I> Source for FnSource<S, L, I>
where
    S: Fn(&Path) -> io::Result<StatRecord>,
    L: Fn(&Path) -> io::Result<I>,
    I: IntoIterator<Item = io::Result<ListEntry>>,
{
    type Entries = I::IntoIter;

    fn stat(&self, path: &Path) -> io::Result<StatRecord> {
        (self.stat)(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Self::Entries> {
        (self.list)(path).map(IntoIterator::into_iter)
    }
}

#[derive(Debug, Default)]
struct Tree {
    dev: u64,
    nodes: BTreeMap<PathBuf, StatRecord>,
    stat_failures: HashMap<PathBuf, io::ErrorKind>,
    list_failures: HashMap<PathBuf, io::ErrorKind>,
}

/// An in-memory filesystem tree.
///
/// Entries are added builder-style while setting up, and can be changed
/// through `&self` afterwards, so a tree shared with a running capture can
/// be mutated from inside the captured closure.
#[derive(Debug)]
pub struct MemorySource {
    tree: Mutex<Tree>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    /// An empty tree whose entries land on volume 1.
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree {
                dev: 1,
                ..Tree::default()
            }),
        }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tree_mut(&mut self) -> &mut Tree {
        self.tree.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put subsequently added entries on this volume.
    pub fn on_volume(mut self, dev: u64) -> Self {
        self.tree_mut().dev = dev;
        self
    }

    /// Add a directory.
    pub fn dir(mut self, path: impl Into<PathBuf>, ino: u64) -> Self {
        let dev = self.tree_mut().dev;
        self.tree_mut().nodes.insert(
            path.into(),
            StatRecord {
                dev,
                ino,
                mode: S_IFDIR | 0o755,
                mtime: 0.0,
                size: 4096,
            },
        );
        self
    }

    /// Add a regular file.
    pub fn file(mut self, path: impl Into<PathBuf>, ino: u64, size: u64, mtime: f64) -> Self {
        let dev = self.tree_mut().dev;
        self.tree_mut().nodes.insert(
            path.into(),
            StatRecord {
                dev,
                ino,
                mode: S_IFREG | 0o644,
                mtime,
                size,
            },
        );
        self
    }

    /// Add an entry with an explicit record.
    pub fn entry(mut self, path: impl Into<PathBuf>, record: StatRecord) -> Self {
        self.tree_mut().nodes.insert(path.into(), record);
        self
    }

    /// Make every stat of `path` fail with `kind`.
    pub fn fail_stat(mut self, path: impl Into<PathBuf>, kind: io::ErrorKind) -> Self {
        self.tree_mut().stat_failures.insert(path.into(), kind);
        self
    }

    /// Make every listing of `path` fail with `kind`.
    pub fn fail_list(mut self, path: impl Into<PathBuf>, kind: io::ErrorKind) -> Self {
        self.tree_mut().list_failures.insert(path.into(), kind);
        self
    }

    /// Insert or replace the record at `path`.
    pub fn set(&self, path: impl Into<PathBuf>, record: StatRecord) {
        self.tree().nodes.insert(path.into(), record);
    }

    /// Current record at `path`, if any.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<StatRecord> {
        self.tree().nodes.get(path.as_ref()).copied()
    }

    /// Remove `path` and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.tree().nodes.retain(|p, _| !p.starts_with(path));
    }

    /// Move `from` and everything below it to `to`, keeping identities.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) {
        let (from, to) = (from.as_ref(), to.as_ref());
        let mut tree = self.tree();
        tree.nodes.retain(|p, _| !p.starts_with(to));
        let moved: Vec<PathBuf> = tree
            .nodes
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(record) = tree.nodes.remove(&old)
                && let Ok(rest) = old.strip_prefix(from)
            {
                let new = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
                tree.nodes.insert(new, record);
            }
        }
    }
}

impl Source for MemorySource {
    type Entries = std::vec::IntoIter<io::Result<ListEntry>>;

    fn stat(&self, path: &Path) -> io::Result<StatRecord> {
        let tree = self.tree();
        if let Some(kind) = tree.stat_failures.get(path) {
            return Err(io::Error::new(*kind, format!("injected stat failure: {path:?}")));
        }
        tree.nodes
            .get(path)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{path:?}")))
    }

    fn list_dir(&self, path: &Path) -> io::Result<Self::Entries> {
        let tree = self.tree();
        if let Some(kind) = tree.list_failures.get(path) {
            return Err(io::Error::new(*kind, format!("injected list failure: {path:?}")));
        }
        match tree.nodes.get(path) {
            None => return Err(io::Error::new(io::ErrorKind::NotFound, format!("{path:?}"))),
            Some(record) if !record.is_dir() => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{path:?}"),
                ));
            }
            Some(_) => {}
        }

        let entries: Vec<_> = tree
            .nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .filter_map(|(p, record)| {
                let name = p.file_name()?;
                Some(Ok(
                    ListEntry::new(name).with_kind(EntryKind::from_mode(record.mode))
                ))
            })
            .collect();
        Ok(entries.into_iter())
    }
}
