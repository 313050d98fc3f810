//! Error types for tillsync-core

use thiserror::Error;

/// Result type alias using tillsync-core's local `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for operations that talk to the remote store
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors raised by the local store and the models layered on it
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the sync pipelines
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote could not be reached (connect failure, timeout, closed socket)
    #[error("Network error: {0}")]
    Network(String),

    /// The remote answered but refused the request
    #[error("Remote rejected request ({status}): {message}")]
    RemoteRejection { status: u16, message: String },

    /// Pulling a table failed; the table stays stale until the next attempt
    #[error("Pull failed for table '{table}': {message}")]
    Pull { table: String, message: String },

    /// Local storage failure, propagated unmodified
    #[error(transparent)]
    LocalStorage(#[from] Error),

    /// Missing credentials, missing user id, or an unregistered table
    #[error("Sync is not configured: {0}")]
    Configuration(String),

    /// The sync pass was cancelled by the caller
    #[error("Sync cancelled")]
    Cancelled,

    /// A remote call or the whole pass exceeded its deadline
    #[error("Sync timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

impl SyncError {
    /// Whether a failed write should be parked in the sync queue for replay.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RemoteRejection { .. } | Self::TimedOut(_)
        )
    }

    /// Short label used in logs and queue entries.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::RemoteRejection { .. } => "remote_rejection",
            Self::Pull { .. } => "pull",
            Self::LocalStorage(_) => "local_storage",
            Self::Configuration(_) => "configuration",
            Self::Cancelled => "cancelled",
            Self::TimedOut(_) => "timed_out",
        }
    }
}

impl From<libsql::Error> for SyncError {
    fn from(error: libsql::Error) -> Self {
        Self::LocalStorage(Error::LibSql(error))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::RemoteRejection {
                status: status.as_u16(),
                message: error.to_string(),
            };
        }
        Self::Network(error.to_string())
    }
}
