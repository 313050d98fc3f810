//! Shared local store service used by the sync engine and clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::KeyedLocks;
use crate::config::RetryPolicy;
use crate::db::{
    Database, LibSqlQueueRepository, LibSqlRecordRepository, LibSqlSettingsRepository,
    QueueRepository, RecordRepository, SettingsRepository,
};
use crate::models::{
    resolve_lww, ConflictSource, LwwDecision, QueueEntryState, Record, SyncConflict,
    SyncQueueEntry, SyncSettings,
};
use crate::Result;

type RecordKey = (String, String);

/// Thread-safe service for DB and repository operations.
///
/// Statements are serialized by one connection mutex. Read-compare-write
/// sequences on a single record additionally hold that record's lock, so
/// writers to the same `(table, id)` never interleave.
#[derive(Clone)]
pub struct StoreService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    record_locks: Arc<KeyedLocks<RecordKey>>,
}

impl StoreService {
    /// Open a store service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::debug!("Opened local store at {}", db_path.display());
        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory store service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            record_locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Filesystem location, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn record_key(table: &str, id: &str) -> RecordKey {
        (table.to_string(), id.to_string())
    }

    /// Release lock slots for records nobody is writing.
    pub fn prune_record_locks(&self) {
        self.record_locks.prune();
    }

    // ---------------------------------------------------------------------
    // Records
    // ---------------------------------------------------------------------

    /// Fetch a record by id.
    pub async fn get_record(&self, table: &str, id: &str) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.get(table, id).await
    }

    /// Replace a record wholesale, regardless of timestamps.
    pub async fn put_record(&self, table: &str, record: &Record) -> Result<()> {
        let _guard = self
            .record_locks
            .lock(&Self::record_key(table, &record.id))
            .await;
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.put(table, record).await
    }

    /// Remove a record without leaving a tombstone.
    pub async fn delete_record(&self, table: &str, id: &str) -> Result<bool> {
        let _guard = self.record_locks.lock(&Self::record_key(table, id)).await;
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.delete(table, id).await
    }

    /// List every record in a table.
    pub async fn list_records(&self, table: &str) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list_all(table).await
    }

    /// Write `incoming` only if it wins last-write-wins against local state.
    ///
    /// Losing versions that are strictly older than the local copy are
    /// recorded in the conflict log.
    pub async fn put_if_newer(
        &self,
        table: &str,
        incoming: &Record,
        source: ConflictSource,
    ) -> Result<LwwDecision> {
        let _guard = self
            .record_locks
            .lock(&Self::record_key(table, &incoming.id))
            .await;

        let local = self.get_record(table, &incoming.id).await?;
        let tombstone = self.tombstone(table, &incoming.id).await?;
        let decision = resolve_lww(local.as_ref(), tombstone, incoming);

        match decision {
            LwwDecision::Applied => {
                let db = self.db.lock().await;
                let repo = LibSqlRecordRepository::new(db.connection());
                repo.put(table, incoming).await?;
            }
            LwwDecision::KeptLocal => {
                if let Some(local) = local.filter(|local| local.supersedes(incoming)) {
                    let db = self.db.lock().await;
                    let repo = LibSqlRecordRepository::new(db.connection());
                    repo.record_conflict(
                        table,
                        &incoming.id,
                        local.updated_at,
                        incoming.updated_at,
                        source,
                    )
                    .await?;
                }
            }
            LwwDecision::Tombstoned => {}
        }

        tracing::debug!(
            "{} {table}/{} at {}: {decision:?}",
            source.as_str(),
            incoming.id,
            incoming.updated_at
        );
        Ok(decision)
    }

    /// Delete a record on behalf of the local user and remember when.
    pub async fn delete_local(&self, table: &str, id: &str, deleted_at: DateTime<Utc>) -> Result<()> {
        let _guard = self.record_locks.lock(&Self::record_key(table, id)).await;
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.delete(table, id).await?;
        repo.set_tombstone(table, id, deleted_at).await
    }

    /// Apply a remote delete.
    ///
    /// With a timestamp the delete loses to a strictly newer local record;
    /// without one it is applied unconditionally. Returns whether the local
    /// state changed.
    pub async fn apply_delete(
        &self,
        table: &str,
        id: &str,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let _guard = self.record_locks.lock(&Self::record_key(table, id)).await;

        let Some(deleted_at) = deleted_at else {
            let db = self.db.lock().await;
            let repo = LibSqlRecordRepository::new(db.connection());
            return repo.delete(table, id).await;
        };

        let local = self.get_record(table, id).await?;
        if local
            .as_ref()
            .is_some_and(|local| local.updated_at > deleted_at)
        {
            tracing::debug!("Ignoring stale delete of {table}/{id} at {deleted_at}");
            return Ok(false);
        }

        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        let removed = repo.delete(table, id).await?;
        repo.set_tombstone(table, id, deleted_at).await?;
        Ok(removed)
    }

    /// Deletion time recorded for a record.
    pub async fn tombstone(&self, table: &str, id: &str) -> Result<Option<DateTime<Utc>>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.tombstone(table, id).await
    }

    /// Forget tombstones older than `before`.
    pub async fn prune_tombstones(&self, before: DateTime<Utc>) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.prune_tombstones(before).await
    }

    /// List recently resolved sync conflicts.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list_conflicts(limit).await
    }

    // ---------------------------------------------------------------------
    // Sync queue
    // ---------------------------------------------------------------------

    /// Park a mutation for later replay.
    pub async fn enqueue(&self, entry: &SyncQueueEntry) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.enqueue(entry).await
    }

    pub async fn get_queue_entry(&self, id: &str) -> Result<Option<SyncQueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.get(id).await
    }

    pub async fn list_pending(&self) -> Result<Vec<SyncQueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list_pending().await
    }

    pub async fn list_due(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<SyncQueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list_due(user_id, now).await
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<SyncQueueEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.list_dead_letters().await
    }

    /// Remove an entry after a confirmed replay (or an operator discard).
    pub async fn mark_processed(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.mark_processed(id).await
    }

    pub async fn mark_failed(
        &self,
        id: &str,
        now: DateTime<Utc>,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<QueueEntryState> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.mark_failed(id, now, error, policy).await
    }

    pub async fn retry_dead_letter(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.retry_dead_letter(id, Utc::now()).await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        repo.pending_count().await
    }

    // ---------------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------------

    /// Load settings.
    pub async fn load_settings(&self) -> Result<SyncSettings> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.load().await
    }

    /// Move the sync cursor forward and return the stored value.
    pub async fn advance_cursor(&self, candidate: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.advance_cursor(candidate).await
    }
}
