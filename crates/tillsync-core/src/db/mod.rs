//! Database layer for Tillsync

mod connection;
mod migrations;
mod queue_repository;
mod record_repository;
mod settings_repository;

pub use connection::Database;
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
pub use record_repository::{LibSqlRecordRepository, RecordRepository};
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};
