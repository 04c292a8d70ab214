//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect and maintain the peerdrop transfer queue and checkpoints.
///
/// Works offline against the data directory; it never starts transfers.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to peerdrop.toml. Defaults to $XDG_CONFIG_HOME/peerdrop/peerdrop.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides `data_dir` from the config file.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbosity level (-v for debug).
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show queue counts by status.
    Stats,
    /// List queue entries in scheduling order.
    List,
    /// List checkpoints of unfinished transfers.
    Checkpoints {
        /// Include completed checkpoints.
        #[arg(long)]
        all: bool,
    },
    /// Delete checkpoints older than the retention window.
    Cleanup,
    /// Requeue a failed transfer.
    Retry { transfer_id: String },
    /// Remove a transfer that is not currently running.
    Cancel { transfer_id: String },
    /// Requeue transfers left running by a host that exited. Run only while
    /// no host is using the data directory.
    Recover,
    /// Remove all completed entries.
    ClearCompleted,
    /// Remove all failed entries.
    ClearFailed,
}
