//! Sync queue entry model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Record;
use crate::error::Error;

/// Mutation kind held by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    /// Insert-or-update of the full record
    Upsert,
    /// Scoped delete by id
    Delete,
}

impl QueueAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown queue action '{other}'"))),
        }
    }
}

/// Lifecycle state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryState {
    /// Waiting for (re)play
    Pending,
    /// Retired after exhausting the retry budget
    DeadLetter,
}

impl QueueEntryState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl FromStr for QueueEntryState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(Error::InvalidInput(format!("unknown queue state '{other}'"))),
        }
    }
}

/// A mutation that could not be applied to the remote immediately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    /// Entry identifier (UUID v7)
    pub id: String,
    /// Tenant the mutation belongs to
    pub user_id: String,
    /// Upsert or delete
    pub action: QueueAction,
    /// Local table name
    pub table_name: String,
    /// Target record id
    pub record_id: String,
    /// Full snapshot for upserts; `None` for deletes
    pub record: Option<Record>,
    /// Enqueue time; for deletes this doubles as the tombstone time
    pub created_at: DateTime<Utc>,
    /// Failed replay count
    pub attempts: u32,
    /// Time of the last failed replay
    pub last_attempt: Option<DateTime<Utc>>,
    /// Earliest time the entry is eligible for replay
    pub next_attempt_at: DateTime<Utc>,
    /// Pending or dead-lettered
    pub state: QueueEntryState,
    /// Message of the last failure
    pub last_error: Option<String>,
}

impl SyncQueueEntry {
    /// Build a fresh entry with `attempts = 0`, due immediately.
    pub fn new(
        user_id: impl Into<String>,
        action: QueueAction,
        table_name: impl Into<String>,
        record_id: impl Into<String>,
        record: Option<Record>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            action,
            table_name: table_name.into(),
            record_id: record_id.into(),
            record,
            created_at: now,
            attempts: 0,
            last_attempt: None,
            next_attempt_at: now,
            state: QueueEntryState::Pending,
            last_error: None,
        }
    }

    /// Timestamp used to order this mutation against other writes to the same record.
    pub fn write_stamp(&self) -> DateTime<Utc> {
        self.record
            .as_ref()
            .map_or(self.created_at, |record| record.updated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_and_state_parse_their_labels() {
        for action in [QueueAction::Upsert, QueueAction::Delete] {
            assert_eq!(action.as_str().parse::<QueueAction>().unwrap(), action);
        }
        for state in [QueueEntryState::Pending, QueueEntryState::DeadLetter] {
            assert_eq!(state.as_str().parse::<QueueEntryState>().unwrap(), state);
        }
        assert!("merge".parse::<QueueAction>().is_err());
    }

    #[test]
    fn write_stamp_prefers_record_timestamp() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::minutes(5);
        let record = Record::new("1", json!({}), earlier).unwrap();

        let upsert = SyncQueueEntry::new("u", QueueAction::Upsert, "orders", "1", Some(record), now);
        assert_eq!(upsert.write_stamp(), earlier);

        let delete = SyncQueueEntry::new("u", QueueAction::Delete, "orders", "1", None, now);
        assert_eq!(delete.write_stamp(), now);
        assert_eq!(delete.attempts, 0);
        assert_eq!(delete.next_attempt_at, now);
    }
}
