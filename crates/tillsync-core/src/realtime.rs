//! Realtime listener: apply remote change events to the local store as they
//! arrive.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};
use crate::models::{
    ConflictSource, LwwDecision, RealtimeEvent, RealtimeEventType, TableChange, TableChangeKind,
};
use crate::remote::RemoteStore;
use crate::state::SyncState;
use crate::sync::SyncEngine;

/// Handle to a running realtime listener.
///
/// Dropping the handle stops the listener; [`unsubscribe`](Self::unsubscribe)
/// also waits for it to finish.
pub struct RealtimeSubscription {
    cancel: CancellationToken,
    closed: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSubscription {
    /// Whether the listener is still consuming events.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && !self.closed.is_cancelled()
            && self
                .task
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Resolves once the listener has stopped, either after
    /// [`unsubscribe`](Self::unsubscribe) or because the feed was lost and
    /// could not be restored.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Stop listening and wait for the listener task to exit.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::warn!("Realtime listener ended abnormally: {error}");
            }
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SyncEngine {
    /// Listen for remote changes to every registered table owned by `user_id`.
    ///
    /// Each applied change is reported to `on_change` after the local store
    /// has been updated. Changes that lose last-write-wins are dropped
    /// silently. A dropped feed is re-opened with the retry policy's backoff;
    /// once that budget is spent the listener stops and the engine reports
    /// [`SyncState::Offline`].
    pub async fn subscribe_to_realtime_changes<F>(
        &self,
        user_id: &str,
        on_change: F,
    ) -> SyncResult<RealtimeSubscription>
    where
        F: Fn(TableChange) + Send + Sync + 'static,
    {
        let remote = Arc::clone(self.remote()?);
        if user_id.trim().is_empty() {
            return Err(SyncError::Configuration("user id is required".into()));
        }

        let cancel = CancellationToken::new();
        let tables = self.tables().remote_tables();
        let mut events = remote.subscribe(user_id, &tables, cancel.clone()).await?;
        tracing::info!("Listening for realtime changes on {} tables", tables.len());

        let engine = self.clone();
        let stop = cancel.clone();
        let closed = CancellationToken::new();
        let done = closed.clone().drop_guard();
        let user_id = user_id.to_string();
        let task = tokio::spawn(async move {
            let _done = done;
            loop {
                let event = tokio::select! {
                    () = stop.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    tracing::warn!("Realtime feed closed, reconnecting");
                    match engine
                        .resubscribe(remote.as_ref(), &user_id, &tables, &stop)
                        .await
                    {
                        Some(next) => {
                            events = next;
                            continue;
                        }
                        None => {
                            if !stop.is_cancelled() {
                                engine.set_state(SyncState::Offline);
                            }
                            break;
                        }
                    }
                };
                match engine.apply_realtime_event(event).await {
                    Ok(Some(change)) => on_change(change),
                    Ok(None) => {}
                    Err(error) => tracing::warn!("Failed to apply realtime change: {error}"),
                }
            }
        });

        Ok(RealtimeSubscription {
            cancel,
            closed,
            task: Some(task),
        })
    }

    /// Re-open a lost feed, backing off between attempts.
    ///
    /// Returns `None` when cancelled or when the retry budget is spent.
    async fn resubscribe(
        &self,
        remote: &dyn RemoteStore,
        user_id: &str,
        tables: &[String],
        stop: &CancellationToken,
    ) -> Option<mpsc::Receiver<RealtimeEvent>> {
        let policy = &self.options().retry;
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            tokio::select! {
                () = stop.cancelled() => return None,
                () = tokio::time::sleep(policy.delay_for(attempts)) => {}
            }
            match remote.subscribe(user_id, tables, stop.clone()).await {
                Ok(events) => {
                    tracing::info!("Realtime feed restored after {attempts} attempts");
                    return Some(events);
                }
                Err(error) if policy.is_exhausted(attempts) => {
                    tracing::warn!("Giving up on realtime feed after {attempts} attempts: {error}");
                    return None;
                }
                Err(error) => tracing::debug!("Realtime reconnect attempt {attempts} failed: {error}"),
            }
        }
    }

    /// Apply one change event (remote table name) to the local store.
    ///
    /// Returns the notification to raise, or `None` when nothing changed.
    pub async fn apply_realtime_event(
        &self,
        event: RealtimeEvent,
    ) -> SyncResult<Option<TableChange>> {
        let Some(table) = self.tables().local_name(&event.table) else {
            tracing::debug!("Ignoring realtime change for unregistered table {}", event.table);
            return Ok(None);
        };

        match event.event_type {
            RealtimeEventType::Insert | RealtimeEventType::Update => {
                let Some(record) = event.new else {
                    return Ok(None);
                };
                let decision = self
                    .store()
                    .put_if_newer(table, &record, ConflictSource::Realtime)
                    .await?;
                Ok((decision == LwwDecision::Applied).then(|| TableChange {
                    table: table.to_string(),
                    record_id: record.id,
                    kind: TableChangeKind::Upserted,
                }))
            }
            RealtimeEventType::Delete => {
                let Some(old) = event.old else {
                    return Ok(None);
                };
                let removed = self
                    .store()
                    .apply_delete(table, &old.id, old.updated_at)
                    .await?;
                Ok(removed.then(|| TableChange {
                    table: table.to_string(),
                    record_id: old.id,
                    kind: TableChangeKind::Deleted,
                }))
            }
        }
    }
}
