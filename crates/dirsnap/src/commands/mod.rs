use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use dirsnap::{Diff, OsSource, Snapshot, SnapshotFile};

pub mod capture;
pub mod diff;
pub mod snapshot;

pub type CommandResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Snapshot a live directory, recording the volume it lives on.
pub fn live_snapshot(
    root: &Path,
    recursive: bool,
    follow_symlinks: bool,
) -> CommandResult<SnapshotFile> {
    let root = root.canonicalize()?;
    let source = OsSource::new().follow_symlinks(follow_symlinks);
    let snapshot = Snapshot::capture(&root, recursive, &source)?;
    info!(?root, entries = snapshot.len(), "Snapshot taken");

    let file = SnapshotFile::new(&snapshot);
    Ok(match fs_info::volume_info(&root) {
        Ok(volume) => file.with_volume(volume),
        Err(err) => {
            warn!(?root, %err, "Could not read volume information");
            file
        }
    })
}

/// Print a diff, as JSON or as a human readable listing.
pub fn print_diff(diff: &Diff, json: bool) -> CommandResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(diff)?);
        return Ok(());
    }

    print_paths("Files created", '+', diff.files_created());
    print_paths("Files deleted", '-', diff.files_deleted());
    print_paths("Files modified", '~', diff.files_modified());
    print_moves("Files moved", diff.files_moved());
    print_paths("Directories created", '+', diff.dirs_created());
    print_paths("Directories deleted", '-', diff.dirs_deleted());
    print_paths("Directories modified", '~', diff.dirs_modified());
    print_moves("Directories moved", diff.dirs_moved());

    eprintln!("Summary: {}", diff);
    Ok(())
}

fn print_paths(title: &str, marker: char, paths: &BTreeSet<PathBuf>) {
    if paths.is_empty() {
        return;
    }
    println!("{} ({}):", title, paths.len());
    for path in paths {
        println!("  {} {}", marker, path.display());
    }
}

fn print_moves(title: &str, moves: &BTreeSet<(PathBuf, PathBuf)>) {
    if moves.is_empty() {
        return;
    }
    println!("{} ({}):", title, moves.len());
    for (from, to) in moves {
        println!("  {} -> {}", from.display(), to.display());
    }
}
