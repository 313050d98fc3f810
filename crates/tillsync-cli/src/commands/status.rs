use serde::Serialize;
use tillsync_core::util::to_iso8601;

use crate::commands::common::CommandContext;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub db_path: String,
    pub configured: bool,
    pub tables: Vec<String>,
    pub last_sync_time: Option<String>,
    pub pending: u64,
    pub dead_letters: usize,
}

pub async fn run_status(as_json: bool, ctx: &CommandContext) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    let report = StatusReport {
        db_path: ctx.db_path.display().to_string(),
        configured: engine.is_configured(),
        tables: engine.tables().tables().map(str::to_string).collect(),
        last_sync_time: engine.get_last_sync_time().await?.map(to_iso8601),
        pending: engine.store().pending_count().await?,
        dead_letters: engine.store().list_dead_letters().await?.len(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    vec![
        format!("Database:     {}", report.db_path),
        format!(
            "Remote:       {}",
            if report.configured { "configured" } else { "not configured" }
        ),
        format!("Tables:       {}", report.tables.join(", ")),
        format!(
            "Last sync:    {}",
            report.last_sync_time.as_deref().unwrap_or("never")
        ),
        format!("Pending:      {}", report.pending),
        format!("Dead letters: {}", report.dead_letters),
    ]
}
