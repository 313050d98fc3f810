//! Record, tombstone and conflict storage

use chrono::{DateTime, Utc};
use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{ConflictSource, Record, SyncConflict};
use crate::util::{from_micros, to_micros};

/// Trait for keyed record storage (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Get a record by table and id
    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>>;

    /// Replace the record at `id` wholesale
    async fn put(&self, table: &str, record: &Record) -> Result<()>;

    /// Remove a record; returns whether a row existed
    async fn delete(&self, table: &str, id: &str) -> Result<bool>;

    /// Every record in a table, oldest first
    async fn list_all(&self, table: &str) -> Result<Vec<Record>>;

    /// Deletion time recorded for a record, if any
    async fn tombstone(&self, table: &str, id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Record (or move forward) a deletion marker
    async fn set_tombstone(&self, table: &str, id: &str, deleted_at: DateTime<Utc>) -> Result<()>;

    /// Drop tombstones older than `before`; returns how many were removed
    async fn prune_tombstones(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Append an LWW conflict audit row
    async fn record_conflict(
        &self,
        table: &str,
        record_id: &str,
        local_updated_at: DateTime<Utc>,
        incoming_updated_at: DateTime<Utc>,
        source: ConflictSource,
    ) -> Result<()>;

    /// Most recent conflicts first
    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &libsql::Row) -> Result<Record> {
        let id: String = row.get(0)?;
        let payload: String = row.get(1)?;
        let updated_at: i64 = row.get(2)?;
        Ok(Record {
            id,
            payload: serde_json::from_str(&payload)?,
            updated_at: from_micros(updated_at),
        })
    }

    fn parse_conflict(row: &libsql::Row) -> Result<SyncConflict> {
        Ok(SyncConflict {
            id: row.get(0)?,
            table_name: row.get(1)?,
            record_id: row.get(2)?,
            local_updated_at: from_micros(row.get(3)?),
            incoming_updated_at: from_micros(row.get(4)?),
            resolved_at: from_micros(row.get(5)?),
            strategy: row.get(6)?,
            source: row.get(7)?,
        })
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, payload, updated_at FROM records WHERE table_name = ? AND id = ?",
                params![table, id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, table: &str, record: &Record) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        let updated_at = to_micros(record.updated_at);

        self.conn
            .execute(
                "INSERT INTO records (table_name, id, payload, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(table_name, id) DO UPDATE SET
                     payload = excluded.payload,
                     updated_at = excluded.updated_at",
                params![table, record.id.as_str(), payload, updated_at],
            )
            .await?;

        // A newer write re-creates a deleted record
        self.conn
            .execute(
                "DELETE FROM tombstones WHERE table_name = ? AND id = ? AND deleted_at < ?",
                params![table, record.id.as_str(), updated_at],
            )
            .await?;

        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM records WHERE table_name = ? AND id = ?",
                params![table, id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn list_all(&self, table: &str) -> Result<Vec<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, payload, updated_at FROM records
                 WHERE table_name = ?
                 ORDER BY updated_at ASC, id ASC",
                [table],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    async fn tombstone(&self, table: &str, id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT deleted_at FROM tombstones WHERE table_name = ? AND id = ?",
                params![table, id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(from_micros(row.get(0)?))),
            None => Ok(None),
        }
    }

    async fn set_tombstone(&self, table: &str, id: &str, deleted_at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tombstones (table_name, id, deleted_at) VALUES (?, ?, ?)
                 ON CONFLICT(table_name, id) DO UPDATE SET
                     deleted_at = MAX(deleted_at, excluded.deleted_at)",
                params![table, id, to_micros(deleted_at)],
            )
            .await?;
        Ok(())
    }

    async fn prune_tombstones(&self, before: DateTime<Utc>) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM tombstones WHERE deleted_at < ?",
                [to_micros(before)],
            )
            .await?;
        Ok(removed)
    }

    async fn record_conflict(
        &self,
        table: &str,
        record_id: &str,
        local_updated_at: DateTime<Utc>,
        incoming_updated_at: DateTime<Utc>,
        source: ConflictSource,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                     table_name, record_id, local_updated_at, incoming_updated_at,
                     resolved_at, strategy, source
                 ) VALUES (?, ?, ?, ?, ?, 'lww', ?)",
                params![
                    table,
                    record_id,
                    to_micros(local_updated_at),
                    to_micros(incoming_updated_at),
                    to_micros(Utc::now()),
                    source.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, table_name, record_id, local_updated_at, incoming_updated_at,
                        resolved_at, strategy, source
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                [limit],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }
}
