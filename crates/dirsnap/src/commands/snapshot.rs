//! Capture a directory tree and write it to a snapshot file

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use tracing::info;

use dirsnap::DEFAULT_COMPRESSION_LEVEL;

use super::{CommandResult, live_snapshot};

/// Capture a directory tree and write it to a snapshot file
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Directory to snapshot
    root: PathBuf,

    /// Output snapshot file path
    output: PathBuf,

    /// Only record the immediate children of the root
    #[arg(long)]
    no_recursive: bool,

    /// Follow symbolic links instead of recording them
    #[arg(long, short = 'L')]
    follow_symlinks: bool,

    /// Zstd compression level (0 to disable, 1-22 for compression)
    #[arg(long, short = 'c', default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    compression: i32,
}

pub fn run(args: SnapshotArgs) -> CommandResult<ExitCode> {
    let file = live_snapshot(&args.root, !args.no_recursive, args.follow_symlinks)?;
    file.write(&args.output, args.compression)?;

    info!(output = ?args.output, "Snapshot written");
    eprintln!("Snapshot written to {:?}", args.output);
    if let Some(ref root) = file.root {
        eprintln!("  Root: {}", root.display());
    }
    eprintln!("  Entries: {}", file.entries.len());
    if let Some(ref volume) = file.volume {
        eprintln!(
            "  Volume: {} ({})",
            volume.dev,
            volume.fs_type.as_deref().unwrap_or("unknown")
        );
    }

    Ok(ExitCode::SUCCESS)
}
