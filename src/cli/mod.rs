//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// pantry-sync CLI - offline-first change queue for pantry data
#[derive(Parser, Debug)]
#[command(name = "psync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.pantry-sync/data/pantry-sync.db)
    #[arg(long, global = true, env = "PANTRY_SYNC_DB")]
    pub db: Option<PathBuf>,

    /// Config file path (default: ~/.pantry-sync/config.json)
    #[arg(long, global = true, env = "PANTRY_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Origin user stamped on queued changes
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Origin device stamped on queued changes (default: generated device id)
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue a local change
    Enqueue(EnqueueArgs),

    /// Inspect and edit the pending queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Push pending changes to the remote once
    Sync,

    /// Run the sync engine until interrupted
    Watch,

    /// Show queue and remote status
    Status,

    /// Show recent sync runs
    History {
        /// Maximum runs to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Entity kind (product, recipe, shoppingList)
    pub entity: String,

    /// Operation (create, update, delete)
    pub op: String,

    /// Target record id
    #[arg(long)]
    pub id: String,

    /// Record as inline JSON
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,

    /// Read the record from a JSON file
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Priority (high, normal, low)
    #[arg(long, short, default_value = "normal")]
    pub priority: String,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List pending changes in dispatch order
    List {
        /// Maximum changes to show
        #[arg(long, short = 'n', default_value = "50")]
        limit: usize,
    },

    /// Drop one pending change
    Drop {
        /// Change id
        id: String,
    },

    /// Drop every pending change
    Clear {
        /// Required when the queue is not empty or cannot be read
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Set one setting (e.g. maxRetries 5, remote.endpoint https://...)
    Set {
        /// Setting key
        key: String,
        /// New value
        value: String,
    },

    /// Restore defaults (the device id is kept)
    Reset,
}
