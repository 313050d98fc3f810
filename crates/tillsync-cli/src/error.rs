use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tillsync_core::Error),
    #[error(transparent)]
    Sync(#[from] tillsync_core::SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Record payload cannot be empty")]
    EmptyPayload,
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Table '{0}' is not registered")]
    UnknownTable(String),
    #[error("Queue entry not found: {0}")]
    QueueEntryNotFound(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error("Realtime feed lost and could not be restored")]
    FeedLost,
    #[error("No user id. Pass --user or set TILLSYNC_USER_ID.")]
    MissingUser,
    #[error(
        "Sync is not configured. Set TILLSYNC_SUPABASE_URL and TILLSYNC_SUPABASE_ANON_KEY, or pass --config with a remote section."
    )]
    SyncNotConfigured,
}
