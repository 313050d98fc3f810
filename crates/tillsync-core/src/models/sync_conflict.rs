//! Sync conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Write path that delivered the losing version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSource {
    Pull,
    Realtime,
}

impl ConflictSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Realtime => "realtime",
        }
    }
}

/// Recorded sync conflict resolved by LWW
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Local table of the record
    pub table_name: String,
    /// Record involved in the conflict
    pub record_id: String,
    /// Existing row's timestamp when conflict occurred
    pub local_updated_at: DateTime<Utc>,
    /// Incoming row's timestamp that was rejected
    pub incoming_updated_at: DateTime<Utc>,
    /// Resolution time
    pub resolved_at: DateTime<Utc>,
    /// Resolution strategy name
    pub strategy: String,
    /// Pull or realtime
    pub source: String,
}
