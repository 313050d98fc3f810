use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tillsync")]
#[command(about = "Sync local business records with the cloud")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Engine config JSON (remote, tables, sync tuning)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// User whose records are synced (defaults to TILLSYNC_USER_ID)
    #[arg(long, global = true, value_name = "ID")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full sync pass: push, pull and merge, queue replay
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync state, last sync time and queue depth
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pull one table from the cloud and merge it locally
    Pull {
        /// Local table name
        table: String,
        /// Only fetch rows updated after this ISO-8601 time
        #[arg(long, value_name = "TIME")]
        since: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a record locally and push it
    Put {
        /// Local table name
        table: String,
        /// Record id
        id: String,
        /// JSON payload (read from stdin when omitted)
        payload: Option<String>,
        /// Only write the local store
        #[arg(long)]
        local_only: bool,
    },
    /// Delete a record locally and in the cloud
    Delete {
        /// Local table name
        table: String,
        /// Record id
        id: String,
    },
    /// List local records of a table
    List {
        /// Local table name
        table: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and manage the sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply realtime changes until interrupted
    Watch,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending (or dead-lettered) entries
    List {
        /// Show dead-lettered entries instead
        #[arg(long)]
        dead: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay due entries now
    Drain,
    /// Move a dead-lettered entry back to pending
    Retry {
        /// Queue entry id
        id: String,
    },
    /// Drop an entry without replaying it
    Discard {
        /// Queue entry id
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
