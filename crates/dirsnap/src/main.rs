use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lloggs::LoggingArgs;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "dirsnap")]
#[command(about = "Snapshot directory trees and report what changed between snapshots")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    Snapshot(commands::snapshot::SnapshotArgs),
    Diff(commands::diff::DiffArgs),
    Capture(commands::capture::CaptureArgs),
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let _guard = args.logging.setup(|v| match v {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    })?;

    match args.command {
        Command::Snapshot(args) => commands::snapshot::run(args),
        Command::Diff(args) => commands::diff::run(args),
        Command::Capture(args) => commands::capture::run(args),
    }
}
