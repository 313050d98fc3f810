//! tillsync-core - Core library for Tillsync
//!
//! This crate contains the record models, local store, sync queue, remote
//! clients and the sync engine used by every Tillsync surface (the CLI and
//! embedding applications).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod realtime;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{parse_engine_config, EngineConfig, RemoteConfig, RetryPolicy, SyncOptions};
pub use error::{Error, Result, SyncError, SyncResult};
pub use models::{Record, SyncQueueEntry, TableChange, TableRegistry};
pub use realtime::RealtimeSubscription;
pub use services::StoreService;
pub use state::SyncState;
pub use sync::{DrainReport, MergeReport, PushOutcome, SyncEngine, SyncSummary};
