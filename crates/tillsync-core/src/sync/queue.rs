//! Queue replay: drain a user's parked mutations in FIFO order.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{GateOutcome, SyncEngine, SyncPass};
use crate::error::{SyncError, SyncResult};
use crate::models::{QueueAction, QueueEntryState, SyncQueueEntry};

/// Outcome of one queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Entries confirmed by the remote and removed
    pub replayed: usize,
    /// Entries removed without a write because newer state exists
    pub superseded: usize,
    /// Entries that failed and stay pending with backoff
    pub failed: usize,
    /// Entries that failed and exhausted their retry budget
    pub dead_lettered: usize,
}

enum Replay {
    Replayed,
    Superseded,
}

impl SyncEngine {
    /// Replay every due queue entry of `user_id`, oldest first.
    ///
    /// Entries leave the queue only after the remote confirms them (or after
    /// local state shows they are obsolete). Failures are rescheduled with the
    /// retry policy's backoff.
    pub async fn drain_queue(&self, user_id: &str) -> SyncResult<DrainReport> {
        self.drain_in_pass(user_id, &SyncPass::standalone()).await
    }

    pub(crate) async fn drain_in_pass(
        &self,
        user_id: &str,
        pass: &SyncPass,
    ) -> SyncResult<DrainReport> {
        self.remote()?;
        if user_id.trim().is_empty() {
            return Err(SyncError::Configuration("user id is required".into()));
        }

        let mut report = DrainReport::default();
        let entries = self.store().list_due(user_id, Utc::now()).await?;
        for entry in entries {
            pass.check()?;

            match self.replay(&entry, pass).await {
                Ok(Replay::Replayed) => {
                    self.store().mark_processed(&entry.id).await?;
                    report.replayed += 1;
                }
                Ok(Replay::Superseded) => {
                    self.store().mark_processed(&entry.id).await?;
                    report.superseded += 1;
                }
                Err(error @ (SyncError::Cancelled | SyncError::LocalStorage(_))) => {
                    return Err(error);
                }
                Err(error) => {
                    pass.check()?;
                    let message = error.to_string();
                    let state = self
                        .store()
                        .mark_failed(&entry.id, Utc::now(), &message, &self.options().retry)
                        .await?;
                    if state == QueueEntryState::DeadLetter {
                        tracing::warn!(
                            "Dead-lettered {} of {}/{} after {} attempts: {error}",
                            entry.action,
                            entry.table_name,
                            entry.record_id,
                            entry.attempts + 1
                        );
                        report.dead_lettered += 1;
                    } else {
                        tracing::debug!(
                            "Replay of {} {}/{} failed: {error}",
                            entry.action,
                            entry.table_name,
                            entry.record_id
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        self.prune_write_gate().await?;

        if report != DrainReport::default() {
            tracing::info!(
                "Queue drain for {user_id}: {} replayed, {} superseded, {} failed, {} dead-lettered",
                report.replayed,
                report.superseded,
                report.failed,
                report.dead_lettered
            );
        }
        Ok(report)
    }

    /// Forget write-gate watermarks of rows with nothing left to replay.
    async fn prune_write_gate(&self) -> SyncResult<()> {
        let pending = self
            .store()
            .list_pending()
            .await?
            .into_iter()
            .map(|entry| (entry.user_id, entry.table_name, entry.record_id))
            .collect::<HashSet<_>>();
        self.inner.gate.prune(&pending);
        Ok(())
    }

    async fn replay(&self, entry: &SyncQueueEntry, pass: &SyncPass) -> SyncResult<Replay> {
        if self.is_obsolete(entry).await? {
            tracing::debug!(
                "Dropping obsolete {} of {}/{}",
                entry.action,
                entry.table_name,
                entry.record_id
            );
            return Ok(Replay::Superseded);
        }

        let outcome = match (entry.action, &entry.record) {
            (QueueAction::Upsert, Some(record)) => {
                self.send_upsert(&entry.table_name, record, &entry.user_id, pass)
                    .await?
            }
            (QueueAction::Upsert, None) => {
                return Err(SyncError::Configuration(
                    "queued upsert has no record snapshot".into(),
                ))
            }
            (QueueAction::Delete, _) => self.send_delete(entry, pass).await?,
        };

        Ok(match outcome {
            GateOutcome::Written => Replay::Replayed,
            GateOutcome::Superseded => Replay::Superseded,
        })
    }

    /// Whether local state already moved past the queued mutation.
    async fn is_obsolete(&self, entry: &SyncQueueEntry) -> SyncResult<bool> {
        let stamp = entry.write_stamp();
        let local = self
            .store()
            .get_record(&entry.table_name, &entry.record_id)
            .await?;
        if local.as_ref().is_some_and(|local| local.updated_at > stamp) {
            return Ok(true);
        }

        if entry.action == QueueAction::Upsert && local.is_none() {
            let tombstone = self
                .store()
                .tombstone(&entry.table_name, &entry.record_id)
                .await?;
            return Ok(tombstone.is_some_and(|deleted_at| deleted_at >= stamp));
        }
        Ok(false)
    }
}
