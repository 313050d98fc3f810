//! In-process `RemoteStore` for tests and offline tooling.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{RemoteRow, RemoteStore};
use crate::error::{SyncError, SyncResult};
use crate::models::RealtimeEvent;

/// A write accepted by the memory remote, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteWrite {
    Upsert {
        table: String,
        id: String,
        updated_at: DateTime<Utc>,
    },
    Delete {
        table: String,
        id: String,
    },
}

struct Subscriber {
    id: u64,
    user_id: String,
    tables: Vec<String>,
    sender: mpsc::Sender<RealtimeEvent>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, BTreeMap<String, RemoteRow>>,
    offline: bool,
    failing_pulls: HashSet<String>,
    rejecting_writes: HashSet<String>,
    writes: Vec<RemoteWrite>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
}

/// Shared, cloneable in-memory remote.
///
/// Clones observe the same tables, so one instance can back several engines
/// standing in for separate devices.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make selects on `table` fail until cleared.
    pub fn fail_pulls(&self, table: impl Into<String>) {
        self.state().failing_pulls.insert(table.into());
    }

    /// Make writes to `table` fail with a rejection until cleared.
    pub fn reject_writes(&self, table: impl Into<String>) {
        self.state().rejecting_writes.insert(table.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_pulls.clear();
        state.rejecting_writes.clear();
    }

    /// Insert a row directly, as if another device had written it.
    pub fn seed(&self, table: impl Into<String>, row: RemoteRow) {
        self.state()
            .tables
            .entry(table.into())
            .or_default()
            .insert(row.id.clone(), row);
    }

    pub fn row(&self, table: &str, id: &str) -> Option<RemoteRow> {
        self.state()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
        self.state()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Accepted writes in arrival order.
    pub fn writes(&self) -> Vec<RemoteWrite> {
        self.state().writes.clone()
    }

    /// Deliver a change to every live subscriber of its table and user.
    ///
    /// Returns how many subscribers received it.
    pub async fn emit(&self, event: RealtimeEvent) -> usize {
        let senders = {
            let mut state = self.state();
            state.subscribers.retain(|subscriber| !subscriber.sender.is_closed());
            let owner = event
                .new
                .as_ref()
                .and_then(|record| {
                    state
                        .tables
                        .get(&event.table)
                        .and_then(|rows| rows.get(&record.id))
                        .map(|row| row.user_id.clone())
                });
            state
                .subscribers
                .iter()
                .filter(|subscriber| subscriber.tables.contains(&event.table))
                .filter(|subscriber| {
                    owner
                        .as_ref()
                        .is_none_or(|owner| *owner == subscriber.user_id)
                })
                .map(|subscriber| subscriber.sender.clone())
                .collect::<Vec<_>>()
        };

        let mut delivered = 0;
        for sender in senders {
            if sender.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Close every live feed, as if the realtime socket had dropped.
    ///
    /// Returns how many feeds were closed.
    pub fn disconnect_subscribers(&self) -> usize {
        let mut state = self.state();
        let closed = state.subscribers.len();
        state.subscribers.clear();
        closed
    }

    fn check_online(state: &MemoryState) -> SyncResult<()> {
        if state.offline {
            Err(SyncError::Network("remote unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn check_writable(state: &MemoryState, table: &str) -> SyncResult<()> {
        Self::check_online(state)?;
        if state.rejecting_writes.contains(table) {
            return Err(SyncError::RemoteRejection {
                status: 400,
                message: format!("writes to {table} are rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert(&self, table: &str, row: &RemoteRow) -> SyncResult<()> {
        let mut state = self.state();
        Self::check_writable(&state, table)?;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(row.id.clone(), row.clone());
        state.writes.push(RemoteWrite::Upsert {
            table: table.to_string(),
            id: row.id.clone(),
            updated_at: row.updated_at,
        });
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str, user_id: &str) -> SyncResult<()> {
        let mut state = self.state();
        Self::check_writable(&state, table)?;
        if let Some(rows) = state.tables.get_mut(table) {
            if rows.get(id).is_some_and(|row| row.user_id == user_id) {
                rows.remove(id);
            }
        }
        state.writes.push(RemoteWrite::Delete {
            table: table.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    async fn select(
        &self,
        table: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRow>> {
        let state = self.state();
        Self::check_online(&state)?;
        if state.failing_pulls.contains(table) {
            return Err(SyncError::RemoteRejection {
                status: 500,
                message: format!("select on {table} failed"),
            });
        }

        let mut rows = state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| row.user_id == user_id)
                    .filter(|row| since.is_none_or(|since| row.updated_at > since))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn subscribe(
        &self,
        user_id: &str,
        tables: &[String],
        cancel: CancellationToken,
    ) -> SyncResult<mpsc::Receiver<RealtimeEvent>> {
        let (sender, receiver) = mpsc::channel(64);
        let id = {
            let mut state = self.state();
            Self::check_online(&state)?;
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            state.subscribers.push(Subscriber {
                id,
                user_id: user_id.to_string(),
                tables: tables.to_vec(),
                sender,
            });
            id
        };

        // Dropping the stored sender closes the feed
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            cancel.cancelled().await;
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscribers
                .retain(|subscriber| subscriber.id != id);
        });
        Ok(receiver)
    }
}
