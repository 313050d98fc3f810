//! Data models for Tillsync

pub mod queue;
pub mod realtime;
pub mod record;
mod settings;
mod sync_conflict;
mod table;

pub use queue::{QueueAction, QueueEntryState, SyncQueueEntry};
pub use realtime::{RealtimeEvent, RealtimeEventType, RecordStamp, TableChange, TableChangeKind};
pub use record::{resolve_lww, LwwDecision, Record};
pub use settings::SyncSettings;
pub use sync_conflict::{ConflictSource, SyncConflict};
pub use table::{TableMapping, TableRegistry};
