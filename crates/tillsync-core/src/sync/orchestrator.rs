//! Full sync pass: push-all, pull-all and merge, queue drain, cursor advance.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{DrainReport, SyncEngine, SyncPass};
use crate::error::{SyncError, SyncResult};
use crate::models::{Record, TableMapping};
use crate::state::SyncState;

/// Per-table counts of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResults {
    /// Records written to the remote, per local table
    pub pushed: BTreeMap<String, usize>,
    /// Records fetched from the remote, per local table; tables whose pull
    /// failed are absent
    pub pulled: BTreeMap<String, usize>,
}

/// Summary returned by a full sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub success: bool,
    pub results: SyncResults,
    /// Pushes parked in the queue during this pass
    pub queued: usize,
    pub queue: DrainReport,
    /// Cursor after the pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncSummary {
    fn failed(error: &SyncError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

impl SyncEngine {
    /// Run a complete sync pass for `user_id`.
    ///
    /// Per-table failures are isolated; `success` is false only when the pass
    /// as a whole could not run (configuration, cancellation, deadline).
    pub async fn full_sync(&self, user_id: &str) -> SyncResult<SyncSummary> {
        self.full_sync_with_cancel(user_id, &CancellationToken::new())
            .await
    }

    /// [`full_sync`](Self::full_sync) that stops early once `cancel` fires.
    pub async fn full_sync_with_cancel(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncSummary> {
        let started_at = Utc::now();
        if let Err(error) = self.check_user(user_id) {
            tracing::warn!("Full sync skipped: {error}");
            self.set_state(SyncState::Error);
            return Ok(SyncSummary::failed(&error));
        }

        tracing::info!("Starting full sync for {user_id}");
        self.set_state(SyncState::Syncing);
        let pass = SyncPass::bounded(cancel, self.options().pass_timeout);
        let mut summary = SyncSummary::default();

        match self.run_pass(user_id, started_at, &pass, &mut summary).await {
            Ok(()) => {
                summary.success = true;
                self.set_state(SyncState::Synced);
                tracing::info!(
                    "Full sync finished: {} pushed, {} pulled, {} queued",
                    summary.results.pushed.values().sum::<usize>(),
                    summary.results.pulled.values().sum::<usize>(),
                    summary.queued
                );
                Ok(summary)
            }
            Err(error @ SyncError::LocalStorage(_)) => {
                self.set_state(SyncState::Error);
                Err(error)
            }
            Err(error) => {
                tracing::warn!("Full sync aborted: {error}");
                self.set_state(SyncState::Error);
                summary.error = Some(error.to_string());
                Ok(summary)
            }
        }
    }

    fn check_user(&self, user_id: &str) -> SyncResult<()> {
        self.remote()?;
        if user_id.trim().is_empty() {
            return Err(SyncError::Configuration("user id is required".into()));
        }
        Ok(())
    }

    async fn run_pass(
        &self,
        user_id: &str,
        started_at: DateTime<Utc>,
        pass: &SyncPass,
        summary: &mut SyncSummary,
    ) -> SyncResult<()> {
        for mapping in self.tables().mappings() {
            let (pushed, queued) = self.push_table(mapping, user_id, pass).await?;
            summary.results.pushed.insert(mapping.local.clone(), pushed);
            summary.queued += queued;
        }
        pass.check()?;

        let since = if self.options().incremental_pull {
            self.store().load_settings().await?.last_sync_time
        } else {
            None
        };
        let mut pull_failed = false;
        for table in self.tables().tables() {
            match self.pull_in_pass(table, user_id, since, pass).await {
                Ok(records) => {
                    self.merge_cloud_data(table, &records).await?;
                    summary.results.pulled.insert(table.to_string(), records.len());
                }
                Err(SyncError::Pull { .. }) => pull_failed = true,
                Err(error) => return Err(error),
            }
        }
        pass.check()?;

        summary.queue = self.drain_in_pass(user_id, pass).await?;
        pass.check()?;

        summary.cursor = if since.is_some() && pull_failed {
            // A skipped table would lose the rows between the old cursor and now.
            self.store().load_settings().await?.last_sync_time
        } else {
            self.store().advance_cursor(started_at).await?
        };
        Ok(())
    }

    /// Push every local record of one table the remote does not already hold
    /// at the same or a newer version. Returns `(pushed, queued)`.
    async fn push_table(
        &self,
        mapping: &TableMapping,
        user_id: &str,
        pass: &SyncPass,
    ) -> SyncResult<(usize, usize)> {
        let table = mapping.local.as_str();
        let records = self.store().list_records(table).await?;
        if records.is_empty() {
            return Ok((0, 0));
        }

        let remote_versions = self.remote_versions(mapping, user_id, pass).await?;
        let candidates = records
            .into_iter()
            .filter(|record| match &remote_versions {
                Some(versions) => versions
                    .get(&record.id)
                    .is_none_or(|remote_at| record.updated_at > *remote_at),
                None => true,
            })
            .collect::<Vec<Record>>();

        let outcomes = stream::iter(candidates)
            .map(|record| async move { self.push_in_pass(table, &record, user_id, pass).await })
            .buffer_unordered(self.options().push_concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let (mut pushed, mut queued) = (0, 0);
        for outcome in outcomes {
            let outcome = outcome?;
            if outcome.superseded {
                continue;
            }
            if outcome.success {
                pushed += 1;
            } else if outcome.queued {
                queued += 1;
            }
        }
        tracing::debug!("Pushed {pushed} records of {table}, queued {queued}");
        Ok((pushed, queued))
    }

    /// Remote `updated_at` per id, or `None` when the remote could not be read
    /// (every local record is then pushed).
    async fn remote_versions(
        &self,
        mapping: &TableMapping,
        user_id: &str,
        pass: &SyncPass,
    ) -> SyncResult<Option<HashMap<String, DateTime<Utc>>>> {
        let remote = self.remote()?;
        let select = remote.select(&mapping.remote, user_id, None);
        match pass.call(self.options().request_timeout, select).await {
            Ok(rows) => Ok(Some(
                rows.into_iter()
                    .map(|row| (row.id, row.updated_at))
                    .collect(),
            )),
            Err(error @ SyncError::Cancelled) => Err(error),
            Err(error) => {
                pass.check()?;
                tracing::debug!("Pushing all of {} unguarded: {error}", mapping.local);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, SyncOptions};
    use crate::models::TableRegistry;
    use crate::remote::{MemoryRemote, RemoteRow, RemoteStore};
    use crate::services::StoreService;
    use crate::util::parse_iso8601;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup(options: SyncOptions) -> (SyncEngine, MemoryRemote) {
        let remote = MemoryRemote::new();
        let store = StoreService::open_in_memory().await.unwrap();
        let tables = TableRegistry::new([("orders", "orders"), ("inventory", "inventory_items")])
            .unwrap();
        let client: Arc<dyn RemoteStore> = Arc::new(remote.clone());
        let engine = SyncEngine::new(store, Some(client), tables, options);
        (engine, remote)
    }

    fn record(id: &str, at: &str) -> Record {
        Record::new(id, json!({"id": id}), parse_iso8601(at).unwrap()).unwrap()
    }

    fn row(id: &str, at: &str) -> RemoteRow {
        RemoteRow {
            id: id.into(),
            user_id: "u1".into(),
            data: json!({"id": id, "remote": true}),
            updated_at: parse_iso8601(at).unwrap(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_sync_pushes_pulls_and_advances_cursor() {
        let (engine, remote) = setup(SyncOptions::default()).await;
        let mut states = engine.subscribe_state();
        engine
            .store()
            .put_record("orders", &record("local", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        remote.seed("inventory_items", row("sku-1", "2024-01-01T00:00:00Z"));

        let summary = engine.full_sync("u1").await.unwrap();

        assert!(summary.success);
        assert_eq!(summary.results.pushed["orders"], 1);
        assert_eq!(summary.results.pushed["inventory"], 0);
        assert_eq!(summary.results.pulled["orders"], 1);
        assert_eq!(summary.results.pulled["inventory"], 1);
        assert!(remote.row("orders", "local").is_some());
        assert!(engine
            .store()
            .get_record("inventory", "sku-1")
            .await
            .unwrap()
            .is_some());

        assert!(summary.cursor.is_some());
        assert_eq!(engine.get_last_sync_time().await.unwrap(), summary.cursor);
        assert!(states.has_changed().unwrap());
        assert_eq!(engine.state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_phase_skips_records_the_remote_already_has() {
        let (engine, remote) = setup(SyncOptions::default()).await;
        let stale = record("1", "2024-01-01T00:00:00Z");
        engine.store().put_record("orders", &stale).await.unwrap();
        remote.seed("orders", row("1", "2024-01-02T00:00:00Z"));

        let summary = engine.full_sync("u1").await.unwrap();

        assert_eq!(summary.results.pushed["orders"], 0);
        assert!(remote.writes().is_empty());
        let merged = engine.store().get_record("orders", "1").await.unwrap().unwrap();
        assert_eq!(merged.updated_at, parse_iso8601("2024-01-02T00:00:00Z").unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_full_sync_queues_without_growing_queue() {
        let options = SyncOptions {
            retry: RetryPolicy {
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                max_attempts: 8,
            },
            ..SyncOptions::default()
        };
        let (engine, remote) = setup(options).await;
        let local = record("1", "2024-01-01T00:00:00Z");
        engine.store().put_record("orders", &local).await.unwrap();
        remote.set_offline(true);

        let first = engine.full_sync("u1").await.unwrap();
        assert!(first.success);
        assert_eq!(first.queued, 1);
        assert_eq!(first.queue.failed, 1);
        assert!(first.results.pulled.is_empty());

        engine.full_sync("u1").await.unwrap();
        assert_eq!(engine.store().pending_count().await.unwrap(), 1);

        remote.set_offline(false);
        let online = engine.full_sync("u1").await.unwrap();
        assert_eq!(online.results.pushed["orders"], 1);
        assert_eq!(online.queue.replayed, 1);
        assert_eq!(engine.store().pending_count().await.unwrap(), 0);
        assert_eq!(remote.row("orders", "1").unwrap().updated_at, local.updated_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_sync_reports_failure() {
        let (engine, _) = setup(SyncOptions::default()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = engine.full_sync_with_cancel("u1", &cancel).await.unwrap();
        assert!(!summary.success);
        assert!(summary.error.is_some());
        assert_eq!(engine.state(), SyncState::Error);
        assert_eq!(engine.get_last_sync_time().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_user_reports_failure() {
        let (engine, remote) = setup(SyncOptions::default()).await;
        let summary = engine.full_sync(" ").await.unwrap();
        assert!(!summary.success);
        assert!(remote.writes().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn incremental_pull_holds_cursor_when_a_table_fails() {
        let options = SyncOptions {
            incremental_pull: true,
            ..SyncOptions::default()
        };
        let (engine, remote) = setup(options).await;

        let first = engine.full_sync("u1").await.unwrap();
        let cursor = first.cursor.unwrap();

        remote.fail_pulls("orders");
        let second = engine.full_sync("u1").await.unwrap();
        assert!(second.success);
        assert_eq!(second.cursor, Some(cursor));
        assert!(!second.results.pulled.contains_key("orders"));
        assert!(second.results.pulled.contains_key("inventory"));
    }
}
