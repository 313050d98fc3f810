use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tillsync_core::models::SyncConflict;
use tillsync_core::util::to_iso8601;
use tillsync_core::{Record, StoreService, SyncEngine, SyncQueueEntry};

use crate::config::{load_engine_config, resolve_user, EnvOverrides};
use crate::error::CliError;

/// Global flags and environment shared by every command
pub struct CommandContext {
    pub db_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub user: Option<String>,
    pub env: EnvOverrides,
}

impl CommandContext {
    pub async fn open_store(&self) -> Result<StoreService, CliError> {
        Ok(StoreService::open_path(self.db_path.clone()).await?)
    }

    pub async fn open_engine(&self) -> Result<SyncEngine, CliError> {
        let config = load_engine_config(self.config_path.as_deref(), &self.env)?;
        let store = self.open_store().await?;
        Ok(SyncEngine::from_config(store, config)?)
    }

    /// Engine with a remote plus the user to act for.
    pub async fn open_sync_engine(&self) -> Result<(SyncEngine, String), CliError> {
        let engine = self.open_engine().await?;
        if !engine.is_configured() {
            return Err(CliError::SyncNotConfigured);
        }
        let user_id = resolve_user(self.user.as_deref(), &self.env)?;
        Ok((engine, user_id))
    }
}

pub fn require_table(engine: &SyncEngine, table: &str) -> Result<(), CliError> {
    if engine.tables().remote_name(table).is_some() {
        Ok(())
    } else {
        Err(CliError::UnknownTable(table.to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub preview: String,
    pub payload: Value,
    pub updated_at: String,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct QueueEntryItem {
    pub id: String,
    pub user_id: String,
    pub action: String,
    pub table_name: String,
    pub record_id: String,
    pub attempts: u32,
    pub created_at: String,
    pub next_attempt_at: String,
    pub state: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub table_name: String,
    pub record_id: String,
    pub local_updated_at: String,
    pub incoming_updated_at: String,
    pub resolved_at: String,
    pub strategy: String,
    pub source: String,
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    RecordListItem {
        id: record.id.clone(),
        preview: record_preview(record, 80),
        payload: record.payload.clone(),
        updated_at: to_iso8601(record.updated_at),
        relative_time: format_relative_time(record.updated_at, Utc::now()),
    }
}

pub fn queue_entry_to_item(entry: &SyncQueueEntry) -> QueueEntryItem {
    QueueEntryItem {
        id: entry.id.clone(),
        user_id: entry.user_id.clone(),
        action: entry.action.to_string(),
        table_name: entry.table_name.clone(),
        record_id: entry.record_id.clone(),
        attempts: entry.attempts,
        created_at: to_iso8601(entry.created_at),
        next_attempt_at: to_iso8601(entry.next_attempt_at),
        state: entry.state.as_str().to_string(),
        last_error: entry.last_error.clone(),
    }
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        table_name: conflict.table_name.clone(),
        record_id: conflict.record_id.clone(),
        local_updated_at: to_iso8601(conflict.local_updated_at),
        incoming_updated_at: to_iso8601(conflict.incoming_updated_at),
        resolved_at: to_iso8601(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
        source: conflict.source.clone(),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now = Utc::now();
    records
        .iter()
        .map(|record| {
            let short_id = record.id.chars().take(16).collect::<String>();
            let preview = record_preview(record, 48);
            let relative_time = format_relative_time(record.updated_at, now);
            format!("{short_id:<16}  {preview:<48}  {relative_time}")
        })
        .collect()
}

pub fn format_queue_lines(entries: &[SyncQueueEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let line = format!(
                "{}  {:<6}  {}/{}  attempts={}  next={}",
                entry.id,
                entry.action,
                entry.table_name,
                entry.record_id,
                entry.attempts,
                format_sync_timestamp(entry.next_attempt_at)
            );
            match &entry.last_error {
                Some(error) => format!("{line}  error={error}"),
                None => line,
            }
        })
        .collect()
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {:<8}  {}/{}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.source,
                conflict.table_name,
                conflict.record_id,
                to_iso8601(conflict.local_updated_at),
                to_iso8601(conflict.incoming_updated_at)
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - timestamp).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// One-line rendering of a record payload, truncated with an ellipsis.
pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let rendered = match &record.payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let collapsed = rendered.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

/// Parse a JSON payload from the argument, or from piped stdin when omitted.
pub fn resolve_payload(argument: Option<&str>) -> Result<Value, CliError> {
    let raw = match argument.and_then(normalize_content) {
        Some(raw) => raw,
        None => read_piped_stdin()?.ok_or(CliError::EmptyPayload)?,
    };
    Ok(serde_json::from_str(&raw)?)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}
