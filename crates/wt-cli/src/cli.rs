//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Watch and listen time tracker.
///
/// Reads page signals from a browser bridge, records how long videos are
/// watched in the foreground or listened to in the background, and reports
/// daily totals.
#[derive(Debug, Parser)]
#[command(name = "wt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Track playback from JSON-lines page events on stdin.
    Track {
        /// Keep totals in memory instead of the database.
        #[arg(long)]
        ephemeral: bool,

        /// Print live totals to stderr while tracking.
        #[arg(long)]
        live: bool,
    },

    /// Show watch and listen totals.
    Stats {
        /// Show the week chart this many weeks back.
        #[arg(long, default_value_t = 0)]
        week_offset: u32,

        /// Output as JSON.
        #[arg(long)]
        json: bool,

        /// Re-render on every display poll interval.
        #[arg(long)]
        follow: bool,
    },

    /// List stored minutes per date.
    Dump {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove entries older than one year.
    Prune,

    /// Clear all recorded time.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,

        /// Delete the stored keys instead of writing empty aggregates.
        #[arg(long)]
        purge: bool,
    },

    /// Initialize storage.
    Init,
}
