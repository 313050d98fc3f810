//! Push pipeline: send local state to the remote, queueing on failure.

use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::{GateOutcome, SyncEngine, SyncPass};
use crate::error::{SyncError, SyncResult};
use crate::models::{QueueAction, Record, SyncQueueEntry};
use crate::remote::RemoteRow;

/// Result of a push or delete.
///
/// `queued` means "not yet durable remotely, but not lost": the mutation sits
/// in the sync queue and will be replayed. `superseded` marks a success where
/// nothing was sent because a newer write for the row already landed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub success: bool,
    pub queued: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub superseded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushOutcome {
    pub(crate) const fn pushed() -> Self {
        Self {
            success: true,
            queued: false,
            superseded: false,
            error: None,
        }
    }

    pub(crate) const fn superseded() -> Self {
        Self {
            success: true,
            queued: false,
            superseded: true,
            error: None,
        }
    }

    pub(crate) const fn sent(outcome: GateOutcome) -> Self {
        match outcome {
            GateOutcome::Written => Self::pushed(),
            GateOutcome::Superseded => Self::superseded(),
        }
    }

    pub(crate) fn queued(error: &SyncError) -> Self {
        Self {
            success: false,
            queued: true,
            superseded: false,
            error: Some(error.to_string()),
        }
    }

    pub(crate) fn failed(error: &SyncError) -> Self {
        Self {
            success: false,
            queued: false,
            superseded: false,
            error: Some(error.to_string()),
        }
    }
}

impl SyncEngine {
    /// Upsert one record's current state for `user_id`.
    ///
    /// Transient failures enqueue the mutation and report `queued`; missing
    /// configuration reports `success: false` without queueing. Only local
    /// storage failures are returned as `Err`.
    pub async fn push_to_cloud(
        &self,
        table: &str,
        record: &Record,
        user_id: &str,
    ) -> SyncResult<PushOutcome> {
        self.push_in_pass(table, record, user_id, &SyncPass::standalone())
            .await
    }

    /// Delete a record locally (leaving a tombstone) and remotely, scoped by
    /// `id` and `user_id`. Failures queue the remote delete.
    pub async fn delete_from_cloud(
        &self,
        table: &str,
        id: &str,
        user_id: &str,
    ) -> SyncResult<PushOutcome> {
        let (remote, remote_table) = match self.target(table, user_id) {
            Ok(target) => target,
            Err(error) => {
                tracing::warn!("Delete of {table}/{id} skipped: {error}");
                return Ok(PushOutcome::failed(&error));
            }
        };

        let deleted_at = Utc::now().trunc_subsecs(6);
        self.store().delete_local(table, id, deleted_at).await?;

        let pass = SyncPass::standalone();
        let timeout = self.options().request_timeout;
        let result = self
            .inner
            .gate
            .write(user_id, table, id, deleted_at, || {
                pass.call(timeout, remote.delete(remote_table, id, user_id))
            })
            .await;

        match result {
            Ok(outcome) => Ok(PushOutcome::sent(outcome)),
            Err(error) if error.is_transient() => {
                let entry =
                    SyncQueueEntry::new(user_id, QueueAction::Delete, table, id, None, deleted_at);
                self.store().enqueue(&entry).await?;
                tracing::warn!("Queued delete of {table}/{id}: {error}");
                Ok(PushOutcome::queued(&error))
            }
            Err(SyncError::LocalStorage(error)) => Err(SyncError::LocalStorage(error)),
            Err(error) => Ok(PushOutcome::failed(&error)),
        }
    }

    pub(crate) async fn push_in_pass(
        &self,
        table: &str,
        record: &Record,
        user_id: &str,
        pass: &SyncPass,
    ) -> SyncResult<PushOutcome> {
        if let Err(error) = self.target(table, user_id) {
            tracing::warn!("Push of {table}/{} skipped: {error}", record.id);
            return Ok(PushOutcome::failed(&error));
        }

        match self.send_upsert(table, record, user_id, pass).await {
            Ok(outcome) => Ok(PushOutcome::sent(outcome)),
            Err(error) if error.is_transient() => {
                let entry = SyncQueueEntry::new(
                    user_id,
                    QueueAction::Upsert,
                    table,
                    &record.id,
                    Some(record.clone()),
                    Utc::now(),
                );
                self.store().enqueue(&entry).await?;
                tracing::warn!("Queued push of {table}/{}: {error}", record.id);
                Ok(PushOutcome::queued(&error))
            }
            Err(SyncError::LocalStorage(error)) => Err(SyncError::LocalStorage(error)),
            Err(error) => Ok(PushOutcome::failed(&error)),
        }
    }

    /// Upsert through the write gate without queueing.
    pub(crate) async fn send_upsert(
        &self,
        table: &str,
        record: &Record,
        user_id: &str,
        pass: &SyncPass,
    ) -> SyncResult<GateOutcome> {
        let (remote, remote_table) = self.target(table, user_id)?;
        let row = RemoteRow::from_record(record, user_id);
        let timeout = self.options().request_timeout;
        self.inner
            .gate
            .write(user_id, table, &record.id, record.updated_at, || {
                pass.call(timeout, remote.upsert(remote_table, &row))
            })
            .await
    }

    /// Delete through the write gate without queueing.
    pub(crate) async fn send_delete(
        &self,
        entry: &SyncQueueEntry,
        pass: &SyncPass,
    ) -> SyncResult<GateOutcome> {
        let (remote, remote_table) = self.target(&entry.table_name, &entry.user_id)?;
        let timeout = self.options().request_timeout;
        self.inner
            .gate
            .write(
                &entry.user_id,
                &entry.table_name,
                &entry.record_id,
                entry.write_stamp(),
                || {
                    pass.call(
                        timeout,
                        remote.delete(remote_table, &entry.record_id, &entry.user_id),
                    )
                },
            )
            .await
    }
}
