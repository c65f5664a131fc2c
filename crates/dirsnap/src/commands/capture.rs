//! Run a command and report what it changed in a directory tree

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

use clap::Args;
use tracing::{info, warn};

use dirsnap::{Capture, OsSource};

use super::{CommandResult, print_diff};

/// Run a command and report what it changed in a directory tree
#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Directory to watch over
    root: PathBuf,

    /// Only record the immediate children of the root
    #[arg(long)]
    no_recursive: bool,

    /// Match entries on inode alone, ignoring the volume id
    #[arg(long)]
    ignore_volume: bool,

    /// Follow symbolic links instead of recording them
    #[arg(long, short = 'L')]
    follow_symlinks: bool,

    /// Print the diff as JSON
    #[arg(long)]
    json: bool,

    /// Command to run, after `--`
    #[arg(last = true, required = true)]
    command: Vec<OsString>,
}

pub fn run(args: CaptureArgs) -> CommandResult<ExitCode> {
    let root = args.root.canonicalize()?;
    let (program, program_args) = args
        .command
        .split_first()
        .ok_or("no command given")?;

    let capture = Capture::new(&root)
        .with_source(OsSource::new().follow_symlinks(args.follow_symlinks))
        .recursive(!args.no_recursive)
        .ignore_volume(args.ignore_volume);

    info!(?root, ?program, "Running command under capture");
    let (status, captured) = capture.run(|| Command::new(program).args(program_args).status())?;

    let post_error = match captured {
        Ok(captured) => {
            print_diff(captured.diff(), args.json)?;
            None
        }
        Err(err) => {
            warn!(?root, %err, "Could not snapshot after the command");
            Some(err)
        }
    };

    let status = status?;
    if !status.success() {
        warn!(%status, "Command failed");
    } else if let Some(err) = post_error {
        return Err(err.into());
    }
    let code = status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1);
    Ok(ExitCode::from(code))
}
