//! CLI argument parsing for hachimi.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

use hachimi_engine::{InteractionFilter, SortField, SortOrder, TimeWindow};
use hachimi_types::Platform;

/// Hachimi
///
/// Engagement history and resonance resurfacing for saved content.
#[derive(Parser, Debug)]
#[command(name = "hachimi")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/hachimi/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Hachimi commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Merge observations from a JSON file (object, array or null; `-` for stdin)
    Observe {
        /// Input path
        input: String,
    },

    /// Check whether a record is stored
    Exists { id: String },

    /// Delete a record so it can be observed afresh
    Exempt { id: String },

    /// Pick records to resurface and mark them shown
    Resonance {
        /// Number of records (default from config)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Report a click on a resurfaced record
    Click { id: String },

    /// Report a hover on a resurfaced record
    Hover { id: String },

    /// Show the score of a stored record
    Score { id: String },

    /// Show the resonance weight of a stored record, factor by factor
    Weight { id: String },

    /// List the most recently updated records
    Recent {
        /// Maximum results
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Filter and sort the stored history
    History {
        /// Age window: 1h, 4h, 12h, 1d, 1w, 1m, all
        #[arg(short, long, default_value = "all")]
        window: TimeWindow,

        /// Minimum score (inclusive)
        #[arg(long)]
        min_score: Option<i64>,

        /// Maximum score (inclusive)
        #[arg(long)]
        max_score: Option<i64>,

        /// Interaction filter, repeatable (score_9, favorite, read_seen, share, ...)
        #[arg(short, long = "interaction")]
        interactions: Vec<InteractionFilter>,

        /// Platform filter, repeatable
        #[arg(short, long = "platform")]
        platforms: Vec<Platform>,

        /// Sort by time or score
        #[arg(long, default_value = "time")]
        sort: SortField,

        /// asc or desc
        #[arg(long, default_value = "desc")]
        order: SortOrder,

        /// Maximum results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete records last updated at or before a time
    Prune {
        /// Cutoff (Unix ms, inclusive)
        #[arg(long)]
        before: i64,
    },

    /// Delete every record
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show store statistics
    Stats,

    /// Simulate repeated single-item selections and report hit rates
    Lab {
        /// Number of draws
        #[arg(short, long, default_value = "1000")]
        rounds: usize,

        /// Use the built-in mock pool instead of stored records
        #[arg(long)]
        mock: bool,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Serve JSON-line requests on stdin, one response line per request
    Serve,
}
