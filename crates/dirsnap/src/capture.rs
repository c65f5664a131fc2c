//! Before/after snapshots around a piece of work.
//!
//! ```no_run
//! use dirsnap::Capture;
//!
//! let capture = Capture::new("/srv/data");
//! let (written, captured) = capture.run(|| std::fs::write("/srv/data/out", b"hi"))?;
//! written?;
//! println!("{}", captured?.diff());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::diff::Diff;
use crate::error::SnapshotError;
use crate::snapshot::Snapshot;
use crate::source::{OsSource, Source};

/// Outcome of taking the "after" snapshot.
pub type Finished = Result<Captured, SnapshotError>;

/// Configuration for a scoped capture of one directory tree.
#[derive(Debug)]
pub struct Capture<S = OsSource> {
    root: PathBuf,
    recursive: bool,
    ignore_volume: bool,
    source: S,
    dropped: Mutex<Option<Finished>>,
}

impl Capture {
    /// Capture `root` recursively on the real filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            ignore_volume: false,
            source: OsSource::new(),
            dropped: Mutex::new(None),
        }
    }
}

impl<S: Source> Capture<S> {
    /// Read the tree through another source.
    pub fn with_source<T: Source>(self, source: T) -> Capture<T> {
        Capture {
            root: self.root,
            recursive: self.recursive,
            ignore_volume: self.ignore_volume,
            source,
            dropped: Mutex::new(None),
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Match entries on inode alone when diffing.
    pub fn ignore_volume(mut self, ignore_volume: bool) -> Self {
        self.ignore_volume = ignore_volume;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn snapshot(&self) -> Result<Snapshot, SnapshotError> {
        Snapshot::capture(&self.root, self.recursive, &self.source)
    }

    /// Take the "before" snapshot.
    ///
    /// The returned guard takes the "after" snapshot when exited, or when
    /// dropped if it never was. A dropped guard leaves its result for
    /// [`Capture::take_dropped`].
    pub fn enter(&self) -> Result<CaptureGuard<'_, S>, SnapshotError> {
        let pre = self.snapshot()?;
        debug!(root = ?self.root, entries = pre.len(), "Capture entered");
        Ok(CaptureGuard {
            capture: self,
            pre,
            done: false,
        })
    }

    /// Run `work` between a before and an after snapshot.
    ///
    /// Fails only if the before snapshot cannot be taken, in which case
    /// `work` never runs. Otherwise whatever `work` returns, errors included,
    /// is handed back untouched next to the outcome of the after snapshot.
    /// If `work` panics, the after snapshot is still taken before the panic
    /// continues, and can be collected with [`Capture::take_dropped`].
    pub fn run<T>(&self, work: impl FnOnce() -> T) -> Result<(T, Finished), SnapshotError> {
        let guard = self.enter()?;
        let output = work();
        Ok((output, guard.exit()))
    }

    /// Take the result left behind by the last guard dropped without
    /// [`CaptureGuard::exit`], such as on an early return or a panic.
    pub fn take_dropped(&self) -> Option<Finished> {
        self.dropped().take()
    }

    fn dropped(&self) -> MutexGuard<'_, Option<Finished>> {
        self.dropped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, pre: Snapshot) -> Finished {
        let post = self.snapshot()?;
        let diff = Diff::compare(&pre, &post, self.ignore_volume);
        Ok(Captured { pre, post, diff })
    }
}

/// An entered capture, waiting for the work to finish.
#[must_use = "dropping the guard ends the capture immediately"]
pub struct CaptureGuard<'c, S: Source> {
    capture: &'c Capture<S>,
    pre: Snapshot,
    done: bool,
}

impl<S: Source> CaptureGuard<'_, S> {
    /// Take the "after" snapshot and compare.
    pub fn exit(mut self) -> Finished {
        self.done = true;
        let captured = self.capture.finish(std::mem::take(&mut self.pre))?;
        debug!(root = ?self.capture.root, diff = %captured.diff, "Capture exited");
        Ok(captured)
    }
}

impl<S: Source> Drop for CaptureGuard<'_, S> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let finished = self.capture.finish(std::mem::take(&mut self.pre));
        match &finished {
            Ok(captured) => {
                debug!(root = ?self.capture.root, diff = %captured.diff, "Capture dropped before exit");
            }
            Err(err) => {
                warn!(root = ?self.capture.root, %err, "Capture dropped before exit, after snapshot failed");
            }
        }
        *self.capture.dropped() = Some(finished);
    }
}

/// Result of a completed capture.
#[derive(Debug, Clone)]
pub struct Captured {
    pre: Snapshot,
    post: Snapshot,
    diff: Diff,
}

impl Captured {
    pub fn pre(&self) -> &Snapshot {
        &self.pre
    }

    pub fn post(&self) -> &Snapshot {
        &self.post
    }

    pub fn diff(&self) -> &Diff {
        &self.diff
    }

    pub fn into_parts(self) -> (Snapshot, Snapshot, Diff) {
        (self.pre, self.post, self.diff)
    }
}
