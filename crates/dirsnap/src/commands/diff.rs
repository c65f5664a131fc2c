//! Compare two snapshots and report what changed

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Args;
use tracing::{info, warn};

use dirsnap::{Diff, SnapshotFile};

use super::{CommandResult, live_snapshot, print_diff};

/// Compare two snapshots and report what changed
///
/// Either side may be a snapshot file or a directory, which is snapshotted
/// on the spot.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Reference snapshot file or directory
    old: PathBuf,

    /// New snapshot file or directory
    new: PathBuf,

    /// Match entries on inode alone, ignoring the volume id
    #[arg(long)]
    ignore_volume: bool,

    /// Follow symbolic links when snapshotting a directory
    #[arg(long, short = 'L')]
    follow_symlinks: bool,

    /// Print the diff as JSON
    #[arg(long)]
    json: bool,
}

fn load(path: &Path, follow_symlinks: bool) -> CommandResult<SnapshotFile> {
    if path.is_dir() {
        live_snapshot(path, true, follow_symlinks)
    } else {
        Ok(SnapshotFile::read(path)?)
    }
}

pub fn run(args: DiffArgs) -> CommandResult<ExitCode> {
    let old = load(&args.old, args.follow_symlinks)?;
    let new = load(&args.new, args.follow_symlinks)?;

    if old.root != new.root {
        warn!(old = ?old.root, new = ?new.root, "Snapshot roots differ, paths will not line up");
    }
    if let (Some(old_volume), Some(new_volume)) = (&old.volume, &new.volume)
        && old_volume.dev != new_volume.dev
        && !args.ignore_volume
    {
        warn!(
            old = old_volume.dev,
            new = new_volume.dev,
            "Volume ids differ, every entry will look replaced; consider --ignore-volume"
        );
    }

    let diff = Diff::compare(&old.into_snapshot(), &new.into_snapshot(), args.ignore_volume);
    info!(%diff, "Comparison complete");

    print_diff(&diff, args.json)?;
    Ok(ExitCode::SUCCESS)
}
