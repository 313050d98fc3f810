//! Remote cloud store seam.
//!
//! The engine talks to the cloud only through [`RemoteStore`]. The Supabase
//! implementation speaks PostgREST for reads and writes and the Phoenix
//! channel protocol for the realtime feed; [`MemoryRemote`] is an in-process
//! stand-in for tests and offline tooling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, SyncResult};
use crate::models::{RealtimeEvent, Record};

pub mod memory;
mod phoenix;
mod supabase;

pub use memory::{MemoryRemote, RemoteWrite};
pub use supabase::SupabaseRemote;

/// Transport envelope of a record in a remote table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub id: String,
    pub user_id: String,
    /// The full record payload
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

impl RemoteRow {
    pub fn from_record(record: &Record, user_id: &str) -> Self {
        Self {
            id: record.id.clone(),
            user_id: user_id.to_string(),
            data: record.payload.clone(),
            updated_at: record.updated_at,
        }
    }

    /// Un-nest the payload into the local record shape.
    pub fn into_record(self) -> Result<Record> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput("remote row has an empty id".into()));
        }
        Record::new(self.id, self.data, self.updated_at)
    }
}

/// Remote multi-tenant store.
///
/// Every operation is scoped by `user_id`; tables are remote names.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or replace a row, conflict target `id`
    async fn upsert(&self, table: &str, row: &RemoteRow) -> SyncResult<()>;

    /// Delete the row matching both `id` and `user_id`
    async fn delete(&self, table: &str, id: &str, user_id: &str) -> SyncResult<()>;

    /// Rows owned by `user_id`, optionally only those updated after `since`,
    /// ordered by `updated_at`
    async fn select(
        &self,
        table: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRow>>;

    /// Open the change feed for `tables`, filtered to `user_id`.
    ///
    /// Events arrive with remote table names. The feed closes when `cancel`
    /// fires, the connection drops, or the receiver is dropped.
    async fn subscribe(
        &self,
        user_id: &str,
        tables: &[String],
        cancel: CancellationToken,
    ) -> SyncResult<mpsc::Receiver<RealtimeEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::parse_iso8601;
    use serde_json::json;

    #[test]
    fn row_parses_postgrest_shape() {
        let payload = r#"{
            "id": "1001",
            "user_id": "user-1",
            "data": {"status": "Dispatched"},
            "updated_at": "2024-01-01T12:00:00+00:00"
        }"#;
        let row: RemoteRow = serde_json::from_str(payload).unwrap();
        let record = row.into_record().unwrap();

        assert_eq!(record.id, "1001");
        assert_eq!(record.payload, json!({"status": "Dispatched"}));
        assert_eq!(record.updated_at, parse_iso8601("2024-01-01T12:00:00Z").unwrap());
    }

    #[test]
    fn row_with_blank_id_is_rejected() {
        let row = RemoteRow {
            id: String::new(),
            user_id: "user-1".into(),
            data: json!({}),
            updated_at: Utc::now(),
        };
        assert!(row.into_record().is_err());
    }

    #[test]
    fn from_record_wraps_payload() {
        let record = Record::new("7", json!({"qty": 3}), Utc::now()).unwrap();
        let row = RemoteRow::from_record(&record, "user-9");
        assert_eq!(row.user_id, "user-9");
        assert_eq!(row.data, record.payload);
        assert_eq!(row.into_record().unwrap(), record);
    }
}
