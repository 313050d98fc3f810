use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use tillsync_core::models::{QueueAction, SyncConflict};
use tillsync_core::{Record, SyncQueueEntry, SyncSummary};
use tempfile::tempdir;

use crate::cli::CompletionShell;
use crate::commands::common::{
    format_queue_lines, format_relative_time, format_sync_conflict_lines, format_sync_timestamp,
    normalize_content, record_preview, require_table, CommandContext,
};
use crate::commands::completions::run_completions;
use crate::commands::status::{format_status_lines, StatusReport};
use crate::commands::sync::format_summary_lines;
use crate::config::{load_engine_config, resolve_db_path, resolve_user, EnvOverrides};
use crate::error::CliError;

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  {}  "), Some("{}".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
}

#[test]
fn format_relative_time_units() {
    let now = at(10_000);
    assert_eq!(format_relative_time(now - Duration::seconds(30), now), "just now");
    assert_eq!(format_relative_time(now - Duration::minutes(2), now), "2m ago");
    assert_eq!(format_relative_time(now - Duration::hours(2), now), "2h ago");
    assert_eq!(format_relative_time(now + Duration::hours(1), now), "just now");
}

#[test]
fn record_preview_truncates_with_ellipsis() {
    let record = Record::new(
        "1",
        json!("This is a very long sentence that should be shortened"),
        at(0),
    )
    .unwrap();
    assert_eq!(record_preview(&record, 20), "This is a very lo...");

    let object = Record::new("2", json!({"status": "Packed"}), at(0)).unwrap();
    assert_eq!(record_preview(&object, 80), r#"{"status":"Packed"}"#);
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(at(0)), "1970-01-01 00:00:00 UTC");
}

#[test]
fn format_sync_conflict_lines_include_key_fields() {
    let conflicts = vec![SyncConflict {
        id: 1,
        table_name: "orders".to_string(),
        record_id: "1001".to_string(),
        local_updated_at: at(200),
        incoming_updated_at: at(100),
        resolved_at: at(300),
        strategy: "lww".to_string(),
        source: "realtime".to_string(),
    }];

    let rendered = format_sync_conflict_lines(&conflicts);
    assert_eq!(rendered.len(), 1);
    assert!(rendered[0].contains("lww"));
    assert!(rendered[0].contains("realtime"));
    assert!(rendered[0].contains("orders/1001"));
    assert!(rendered[0].contains("local=1970-01-01T00:03:20Z"));
    assert!(rendered[0].contains("incoming=1970-01-01T00:01:40Z"));
}

#[test]
fn format_queue_lines_show_last_error() {
    let mut entry = SyncQueueEntry::new("u1", QueueAction::Delete, "orders", "1001", None, at(0));
    let clean = format_queue_lines(std::slice::from_ref(&entry));
    assert!(clean[0].contains("delete"));
    assert!(clean[0].contains("orders/1001"));
    assert!(!clean[0].contains("error="));

    entry.attempts = 2;
    entry.last_error = Some("Network error: refused".to_string());
    let failed = format_queue_lines(&[entry]);
    assert!(failed[0].contains("attempts=2"));
    assert!(failed[0].contains("error=Network error: refused"));
}

#[test]
fn summary_lines_mark_failed_pulls() {
    let mut summary = SyncSummary {
        success: true,
        ..SyncSummary::default()
    };
    summary.results.pushed.insert("inventory".into(), 0);
    summary.results.pushed.insert("orders".into(), 2);
    summary.results.pulled.insert("inventory".into(), 5);

    let lines = format_summary_lines(&summary);
    assert!(lines[0].starts_with("inventory"));
    assert!(lines[0].contains("pulled=5"));
    assert!(lines[1].contains("pushed=2"));
    assert!(lines[1].contains("pulled=failed"));
    assert_eq!(lines.last().map(String::as_str), Some("Sync completed"));
}

#[test]
fn status_lines_render_never_synced() {
    let report = StatusReport {
        db_path: "/tmp/tillsync.db".into(),
        configured: false,
        tables: vec!["orders".into(), "inventory".into()],
        last_sync_time: None,
        pending: 3,
        dead_letters: 1,
    };
    let lines = format_status_lines(&report);
    assert!(lines[1].contains("not configured"));
    assert!(lines[2].contains("orders, inventory"));
    assert!(lines[3].contains("never"));
    assert!(lines[4].contains('3'));
}

#[test]
fn user_flag_wins_over_environment() {
    let env = EnvOverrides {
        user_id: Some("env-user".into()),
        ..EnvOverrides::default()
    };
    assert_eq!(resolve_user(Some(" flag-user "), &env).unwrap(), "flag-user");
    assert_eq!(resolve_user(Some("  "), &env).unwrap(), "env-user");
    assert!(matches!(
        resolve_user(None, &EnvOverrides::default()),
        Err(CliError::MissingUser)
    ));
}

#[test]
fn db_path_prefers_flag_then_environment() {
    let env = EnvOverrides {
        db_path: Some(PathBuf::from("/env/tillsync.db")),
        ..EnvOverrides::default()
    };
    assert_eq!(
        resolve_db_path(Some(PathBuf::from("/flag/tillsync.db")), &env),
        PathBuf::from("/flag/tillsync.db")
    );
    assert_eq!(resolve_db_path(None, &env), PathBuf::from("/env/tillsync.db"));
    assert!(resolve_db_path(None, &EnvOverrides::default()).ends_with("tillsync/tillsync.db"));
}

#[test]
fn environment_credentials_override_config_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "remote": {"url": "https://file.supabase.co", "anon_key": "file-key", "request_timeout_secs": 5},
            "tables": [{"local": "orders", "remote": "shop_orders"}],
            "sync": {"push_concurrency": 2}
        }"#,
    )
    .unwrap();

    let from_file = load_engine_config(Some(&path), &EnvOverrides::default()).unwrap();
    assert_eq!(from_file.remote.as_ref().unwrap().url, "https://file.supabase.co");
    assert_eq!(from_file.tables.remote_name("orders"), Some("shop_orders"));
    assert_eq!(from_file.sync.push_concurrency, 2);

    let env = EnvOverrides {
        supabase_url: Some("https://env.supabase.co/".into()),
        supabase_anon_key: Some("env-key".into()),
        access_token: Some("jwt".into()),
        ..EnvOverrides::default()
    };
    let merged = load_engine_config(Some(&path), &env).unwrap();
    let remote = merged.remote.unwrap();
    assert_eq!(remote.url, "https://env.supabase.co");
    assert_eq!(remote.anon_key, "env-key");
    assert_eq!(remote.access_token.as_deref(), Some("jwt"));
    assert_eq!(remote.request_timeout, std::time::Duration::from_secs(5));
}

#[test]
fn partial_environment_credentials_are_rejected() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("config.json");
    std::fs::write(&path, r#"{"tables": [{"local": "orders", "remote": "orders"}]}"#).unwrap();

    let env = EnvOverrides {
        supabase_url: Some("https://env.supabase.co".into()),
        ..EnvOverrides::default()
    };
    assert!(matches!(
        load_engine_config(Some(&path), &env),
        Err(CliError::Config(_))
    ));
}

#[test]
fn missing_config_file_is_reported() {
    let tmp = tempdir().unwrap();
    let missing = tmp.path().join("missing.json");
    assert!(matches!(
        load_engine_config(Some(&missing), &EnvOverrides::default()),
        Err(CliError::Config(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn unconfigured_context_opens_local_engine_only() {
    let tmp = tempdir().unwrap();
    let config_path = tmp.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{"tables": [{"local": "orders", "remote": "orders"}]}"#,
    )
    .unwrap();
    let ctx = CommandContext {
        db_path: tmp.path().join("data").join("tillsync.db"),
        config_path: Some(config_path),
        user: Some("u1".into()),
        env: EnvOverrides::default(),
    };

    let engine = ctx.open_engine().await.unwrap();
    assert!(!engine.is_configured());
    assert!(require_table(&engine, "orders").is_ok());
    assert!(matches!(
        require_table(&engine, "expenses"),
        Err(CliError::UnknownTable(_))
    ));
    assert!(matches!(
        ctx.open_sync_engine().await,
        Err(CliError::SyncNotConfigured)
    ));

    let record = Record::new("1001", json!({"status": "Packed"}), Utc::now()).unwrap();
    engine.store().put_record("orders", &record).await.unwrap();
    let reopened = ctx.open_store().await.unwrap();
    assert_eq!(reopened.list_records("orders").await.unwrap(), vec![record]);
}

#[test]
fn completions_are_written_to_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("tillsync.bash");
    run_completions(CompletionShell::Bash, Some(&path)).unwrap();
    let script = std::fs::read_to_string(&path).unwrap();
    assert!(script.contains("tillsync"));
}
