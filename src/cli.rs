mod help_text;

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Seal a directory tree and detect drift and silent corruption
#[derive(Parser, Debug)]
#[command(
    name = "treeseal",
    version,
    about,
    long_about = help_text::ROOT_LONG_ABOUT
)]
pub struct Cli {
    /// Change to DIRECTORY before doing anything
    #[arg(short = 'C', global = true, value_name = "DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Increase logging verbosity (-v info, -vv debug). Takes precedence over RUST_LOG.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record the current state of the directory tree
    #[command(long_about = help_text::INIT_LONG_ABOUT)]
    Init {
        /// Discard an existing store and seal from scratch
        #[arg(long)]
        force: bool,
    },

    /// Show files that changed since they were sealed
    #[command(long_about = help_text::STATUS_LONG_ABOUT)]
    Status {
        /// List unchanged files too
        #[arg(long)]
        all: bool,

        /// Show what changed for each file
        #[arg(long)]
        diff: bool,
    },

    /// Check the tree against the store, exit with success if nothing changed
    #[command(long_about = help_text::VERIFY_LONG_ABOUT)]
    Verify {},

    /// Record changes in the store
    #[command(long_about = help_text::ACCEPT_LONG_ABOUT)]
    Accept {
        /// Only proceed if changes match this fingerprint from status
        #[arg(long, value_name = "FINGERPRINT")]
        fingerprint: Option<String>,

        /// Entries to accept, relative to the root (default: everything)
        #[arg(value_name = "PATH")]
        paths: Vec<String>,
    },

    /// List stored files with the given SHA-256 checksum
    #[command(long_about = help_text::FIND_LONG_ABOUT)]
    Find {
        /// Checksum as 64 hex digits
        #[arg(value_name = "HEX")]
        checksum: String,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
