//! Sync engine: push, pull, merge, queue replay and full sync passes.
//!
//! [`SyncEngine`] is the explicit context every pipeline runs against. It
//! owns the local store handle, the remote client, the table registry, the
//! tuning options, the per-record write gate and the published sync state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, SyncOptions};
use crate::error::{SyncError, SyncResult};
use crate::models::TableRegistry;
use crate::remote::{RemoteStore, SupabaseRemote};
use crate::services::StoreService;
use crate::state::SyncState;

mod merge;
mod orchestrator;
mod ordering;
mod pull;
mod push;
mod queue;

pub use crate::config::RetryPolicy;
pub use merge::MergeReport;
pub use orchestrator::{SyncResults, SyncSummary};
pub use ordering::{GateKey, GateOutcome, WriteGate};
pub use push::PushOutcome;
pub use queue::DrainReport;

/// Cancellation and deadline shared by every remote call of one operation.
pub(crate) struct SyncPass {
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl SyncPass {
    /// A standalone operation: never cancelled, no overall deadline.
    pub(crate) fn standalone() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub(crate) fn bounded(cancel: &CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel: cancel.child_token(),
            deadline: Some((Instant::now() + timeout, timeout)),
        }
    }

    /// Fail fast once the pass is cancelled or out of time.
    pub(crate) fn check(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        match self.deadline {
            Some((deadline, timeout)) if Instant::now() >= deadline => {
                Err(SyncError::TimedOut(timeout))
            }
            _ => Ok(()),
        }
    }

    /// Run one remote call under the per-request timeout, the pass deadline
    /// and cancellation.
    pub(crate) async fn call<T, F>(&self, request_timeout: Duration, future: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        self.check()?;
        let pass_deadline = async {
            match self.deadline {
                Some((deadline, timeout)) => {
                    tokio::time::sleep_until(deadline).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = self.cancel.cancelled() => Err(SyncError::Cancelled),
            timeout = pass_deadline => Err(SyncError::TimedOut(timeout)),
            result = tokio::time::timeout(request_timeout, future) => {
                result.unwrap_or(Err(SyncError::TimedOut(request_timeout)))
            }
        }
    }
}

struct EngineInner {
    store: StoreService,
    remote: Option<Arc<dyn RemoteStore>>,
    tables: TableRegistry,
    options: SyncOptions,
    gate: WriteGate,
    state: watch::Sender<SyncState>,
}

/// Cloneable handle to the sync context.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Build an engine. Without a remote every network entry point reports a
    /// configuration failure.
    pub fn new(
        store: StoreService,
        remote: Option<Arc<dyn RemoteStore>>,
        tables: TableRegistry,
        options: SyncOptions,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Offline);
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                tables,
                options,
                gate: WriteGate::new(),
                state,
            }),
        }
    }

    /// Build an engine from a parsed config, connecting to Supabase when a
    /// remote section is present.
    pub fn from_config(store: StoreService, config: EngineConfig) -> SyncResult<Self> {
        let remote = match config.remote {
            Some(remote) => {
                let client: Arc<dyn RemoteStore> = Arc::new(SupabaseRemote::new(remote)?);
                Some(client)
            }
            None => None,
        };
        Ok(Self::new(store, remote, config.tables, config.sync))
    }

    pub fn store(&self) -> &StoreService {
        &self.inner.store
    }

    pub fn tables(&self) -> &TableRegistry {
        &self.inner.tables
    }

    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    pub fn is_configured(&self) -> bool {
        self.inner.remote.is_some()
    }

    /// Current published state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        self.inner.state.send_replace(state);
    }

    /// Completion time of the last successful full sync.
    pub async fn get_last_sync_time(&self) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.inner.store.load_settings().await?.last_sync_time)
    }

    pub(crate) fn remote(&self) -> SyncResult<&Arc<dyn RemoteStore>> {
        self.inner
            .remote
            .as_ref()
            .ok_or_else(|| SyncError::Configuration("no remote store configured".into()))
    }

    /// Resolve the remote client and remote table name for a call, checking
    /// the caller's identity.
    fn target(&self, table: &str, user_id: &str) -> SyncResult<(&Arc<dyn RemoteStore>, &str)> {
        let remote = self.remote()?;
        if user_id.trim().is_empty() {
            return Err(SyncError::Configuration("user id is required".into()));
        }
        let remote_table = self
            .inner
            .tables
            .remote_name(table)
            .ok_or_else(|| SyncError::Configuration(format!("table '{table}' is not registered")))?;
        Ok((remote, remote_table))
    }
}
