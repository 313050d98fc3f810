//! Sync queue repository implementation

use chrono::{DateTime, Utc};
use libsql::{params, Connection, Value};

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::models::{QueueAction, QueueEntryState, Record, SyncQueueEntry};
use crate::util::{from_micros, to_micros};

const ENTRY_COLUMNS: &str = "id, user_id, action, table_name, record_id, record, created_at, \
                             attempts, last_attempt, next_attempt_at, state, last_error";

/// Trait for durable queue operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Append an entry; returns `false` when an identical entry is already pending.
    ///
    /// A delete for a record that already has a pending delete is folded into
    /// that entry, whose stamp moves forward to the later of the two.
    async fn enqueue(&self, entry: &SyncQueueEntry) -> Result<bool>;

    /// Get an entry by id
    async fn get(&self, id: &str) -> Result<Option<SyncQueueEntry>>;

    /// Every pending entry, oldest first
    async fn list_pending(&self) -> Result<Vec<SyncQueueEntry>>;

    /// Pending entries for a user that are due at `now`, oldest first
    async fn list_due(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<SyncQueueEntry>>;

    /// Entries retired by the retry policy
    async fn list_dead_letters(&self) -> Result<Vec<SyncQueueEntry>>;

    /// Remove an entry after a confirmed replay; returns whether it existed
    async fn mark_processed(&self, id: &str) -> Result<bool>;

    /// Record a failed replay and schedule the next one (or retire the entry)
    async fn mark_failed(
        &self,
        id: &str,
        now: DateTime<Utc>,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<QueueEntryState>;

    /// Move a dead-lettered entry back to pending with a fresh budget
    async fn retry_dead_letter(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Number of pending entries
    async fn pending_count(&self) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_entries(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<SyncQueueEntry>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    fn parse_entry(row: &libsql::Row) -> Result<SyncQueueEntry> {
        let action: String = row.get(2)?;
        let state: String = row.get(10)?;
        let attempts: i64 = row.get(7)?;

        let record = match row.get_value(5)? {
            Value::Text(json) => Some(serde_json::from_str::<Record>(&json)?),
            _ => None,
        };
        let last_attempt = match row.get_value(8)? {
            Value::Integer(micros) => Some(from_micros(micros)),
            _ => None,
        };
        let last_error = match row.get_value(11)? {
            Value::Text(message) => Some(message),
            _ => None,
        };

        Ok(SyncQueueEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            action: action.parse()?,
            table_name: row.get(3)?,
            record_id: row.get(4)?,
            record,
            created_at: from_micros(row.get(6)?),
            attempts: u32::try_from(attempts)
                .map_err(|_| Error::Database(format!("invalid attempts value {attempts}")))?,
            last_attempt,
            next_attempt_at: from_micros(row.get(9)?),
            state: state.parse()?,
            last_error,
        })
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn enqueue(&self, entry: &SyncQueueEntry) -> Result<bool> {
        let stamp = to_micros(entry.write_stamp());

        match entry.action {
            QueueAction::Upsert => {
                let mut rows = self
                    .conn
                    .query(
                        "SELECT 1 FROM sync_queue
                         WHERE state = 'pending' AND user_id = ? AND action = ?
                           AND table_name = ? AND record_id = ? AND stamp = ?
                         LIMIT 1",
                        params![
                            entry.user_id.as_str(),
                            entry.action.as_str(),
                            entry.table_name.as_str(),
                            entry.record_id.as_str(),
                            stamp
                        ],
                    )
                    .await?;
                if rows.next().await?.is_some() {
                    return Ok(false);
                }
            }
            QueueAction::Delete => {
                // A pending delete absorbs a later one and carries its stamp
                let merged = self
                    .conn
                    .execute(
                        "UPDATE sync_queue
                         SET stamp = MAX(stamp, ?1), created_at = MAX(created_at, ?1)
                         WHERE state = 'pending' AND user_id = ?2 AND action = ?3
                           AND table_name = ?4 AND record_id = ?5",
                        params![
                            stamp,
                            entry.user_id.as_str(),
                            entry.action.as_str(),
                            entry.table_name.as_str(),
                            entry.record_id.as_str()
                        ],
                    )
                    .await?;
                if merged > 0 {
                    return Ok(false);
                }
            }
        }

        let record = match &entry.record {
            Some(record) => Value::Text(serde_json::to_string(record)?),
            None => Value::Null,
        };
        let last_attempt = entry
            .last_attempt
            .map_or(Value::Null, |at| Value::Integer(to_micros(at)));
        let last_error = entry
            .last_error
            .clone()
            .map_or(Value::Null, Value::Text);

        self.conn
            .execute(
                "INSERT INTO sync_queue (
                     id, user_id, action, table_name, record_id, record, stamp, created_at,
                     attempts, last_attempt, next_attempt_at, state, last_error
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.id.as_str(),
                    entry.user_id.as_str(),
                    entry.action.as_str(),
                    entry.table_name.as_str(),
                    entry.record_id.as_str(),
                    record,
                    stamp,
                    to_micros(entry.created_at),
                    i64::from(entry.attempts),
                    last_attempt,
                    to_micros(entry.next_attempt_at),
                    entry.state.as_str(),
                    last_error
                ],
            )
            .await?;

        Ok(true)
    }

    async fn get(&self, id: &str) -> Result<Option<SyncQueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE id = ?");
        Ok(self.query_entries(&sql, [id]).await?.into_iter().next())
    }

    async fn list_pending(&self) -> Result<Vec<SyncQueueEntry>> {
        let sql =
            format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE state = 'pending' ORDER BY seq");
        self.query_entries(&sql, ()).await
    }

    async fn list_due(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<SyncQueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE state = 'pending' AND user_id = ? AND next_attempt_at <= ?
             ORDER BY seq"
        );
        self.query_entries(&sql, params![user_id, to_micros(now)])
            .await
    }

    async fn list_dead_letters(&self) -> Result<Vec<SyncQueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE state = 'dead_letter' ORDER BY seq"
        );
        self.query_entries(&sql, ()).await
    }

    async fn mark_processed(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    async fn mark_failed(
        &self,
        id: &str,
        now: DateTime<Utc>,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<QueueEntryState> {
        let entry = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("queue entry {id}")))?;

        let attempts = entry.attempts.saturating_add(1);
        let (state, next_attempt_at) = if policy.is_exhausted(attempts) {
            (QueueEntryState::DeadLetter, now)
        } else {
            let delay = chrono::Duration::from_std(policy.delay_for(attempts))
                .unwrap_or(chrono::Duration::MAX);
            (
                QueueEntryState::Pending,
                now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
            )
        };

        self.conn
            .execute(
                "UPDATE sync_queue
                 SET attempts = ?, last_attempt = ?, next_attempt_at = ?, state = ?, last_error = ?
                 WHERE id = ?",
                params![
                    i64::from(attempts),
                    to_micros(now),
                    to_micros(next_attempt_at),
                    state.as_str(),
                    error,
                    id
                ],
            )
            .await?;

        Ok(state)
    }

    async fn retry_dead_letter(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET state = 'pending', attempts = 0, next_attempt_at = ?
                 WHERE id = ? AND state = 'dead_letter'",
                params![to_micros(now), id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn pending_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_queue WHERE state = 'pending'", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn upsert(record_id: &str, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> SyncQueueEntry {
        let record = Record::new(record_id, json!({"n": record_id}), updated_at).unwrap();
        SyncQueueEntry::new(
            "user-1",
            QueueAction::Upsert,
            "orders",
            record_id,
            Some(record),
            now,
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_keeps_fifo_order() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let now = Utc::now();

        for id in ["c", "a", "b"] {
            assert!(repo.enqueue(&upsert(id, now, now)).await.unwrap());
        }

        let pending = repo.list_pending().await.unwrap();
        let ids = pending
            .iter()
            .map(|entry| entry.record_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, ["c", "a", "b"]);
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(pending[0].record.as_ref().unwrap().payload, json!({"n": "c"}));
        assert_eq!(repo.pending_count().await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_skips_identical_pending_entry() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let now = Utc::now();

        assert!(repo.enqueue(&upsert("1", now, now)).await.unwrap());
        assert!(!repo.enqueue(&upsert("1", now, now)).await.unwrap());

        let newer = now + chrono::Duration::seconds(1);
        assert!(repo.enqueue(&upsert("1", newer, now)).await.unwrap());

        let delete = SyncQueueEntry::new("user-1", QueueAction::Delete, "orders", "1", None, now);
        assert!(repo.enqueue(&delete).await.unwrap());
        let again = SyncQueueEntry::new("user-1", QueueAction::Delete, "orders", "1", None, now);
        assert!(!repo.enqueue(&again).await.unwrap());

        assert_eq!(repo.pending_count().await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_later_delete_advances_pending_delete() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let first = from_micros(to_micros(Utc::now()));
        let later = first + chrono::Duration::minutes(3);

        let delete = SyncQueueEntry::new("user-1", QueueAction::Delete, "orders", "1", None, first);
        assert!(repo.enqueue(&delete).await.unwrap());
        let again = SyncQueueEntry::new("user-1", QueueAction::Delete, "orders", "1", None, later);
        assert!(!repo.enqueue(&again).await.unwrap());

        let stored = repo.get(&delete.id).await.unwrap().unwrap();
        assert_eq!(stored.write_stamp(), later);
        assert_eq!(repo.pending_count().await.unwrap(), 1);

        // An older delete never moves the stamp back
        let stale = SyncQueueEntry::new("user-1", QueueAction::Delete, "orders", "1", None, first);
        assert!(!repo.enqueue(&stale).await.unwrap());
        let stored = repo.get(&delete.id).await.unwrap().unwrap();
        assert_eq!(stored.write_stamp(), later);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_due_filters_user_and_schedule() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let now = Utc::now();

        let due = upsert("1", now, now);
        let mut later = upsert("2", now, now);
        later.next_attempt_at = now + chrono::Duration::minutes(5);
        let other_user = SyncQueueEntry::new(
            "user-2",
            QueueAction::Delete,
            "orders",
            "3",
            None,
            now,
        );
        for entry in [&due, &later, &other_user] {
            repo.enqueue(entry).await.unwrap();
        }

        let listed = repo.list_due("user-1", now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_processed_removes_entry() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let now = Utc::now();
        let entry = upsert("1", now, now);
        repo.enqueue(&entry).await.unwrap();

        assert!(repo.mark_processed(&entry.id).await.unwrap());
        assert!(!repo.mark_processed(&entry.id).await.unwrap());
        assert_eq!(repo.get(&entry.id).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_failed_backs_off_then_dead_letters() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let now = Utc::now();
        let entry = upsert("1", now, now);
        repo.enqueue(&entry).await.unwrap();

        let state = repo
            .mark_failed(&entry.id, now, "connection refused", &policy())
            .await
            .unwrap();
        assert_eq!(state, QueueEntryState::Pending);
        let stored = repo.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("connection refused"));
        assert_eq!(
            stored.next_attempt_at,
            from_micros(to_micros(now + chrono::Duration::seconds(10)))
        );
        assert!(repo.list_due("user-1", now).await.unwrap().is_empty());

        repo.mark_failed(&entry.id, now, "again", &policy())
            .await
            .unwrap();
        let state = repo
            .mark_failed(&entry.id, now, "rejected", &policy())
            .await
            .unwrap();
        assert_eq!(state, QueueEntryState::DeadLetter);
        assert_eq!(repo.pending_count().await.unwrap(), 0);

        let dead = repo.list_dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_dead_letter_resets_budget() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let now = Utc::now();
        let entry = upsert("1", now, now);
        repo.enqueue(&entry).await.unwrap();

        let single = RetryPolicy {
            max_attempts: 1,
            ..policy()
        };
        repo.mark_failed(&entry.id, now, "rejected", &single)
            .await
            .unwrap();
        assert!(repo.retry_dead_letter(&entry.id, now).await.unwrap());
        assert!(!repo.retry_dead_letter(&entry.id, now).await.unwrap());

        let stored = repo.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(stored.state, QueueEntryState::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(repo.list_due("user-1", now).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_failed_unknown_entry() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let result = repo
            .mark_failed("missing", Utc::now(), "boom", &policy())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
