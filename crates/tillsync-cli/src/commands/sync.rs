use tillsync_core::SyncSummary;
use tokio_util::sync::CancellationToken;

use crate::commands::common::CommandContext;
use crate::error::CliError;

pub async fn run_sync(as_json: bool, ctx: &CommandContext) -> Result<(), CliError> {
    let (engine, user_id) = ctx.open_sync_engine().await?;
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let summary = engine.full_sync_with_cancel(&user_id, &cancel).await;
    interrupt.abort();
    let summary = summary?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in format_summary_lines(&summary) {
            println!("{line}");
        }
    }

    if summary.success {
        Ok(())
    } else {
        Err(CliError::SyncFailed(summary.error.unwrap_or_default()))
    }
}

pub fn format_summary_lines(summary: &SyncSummary) -> Vec<String> {
    let mut lines = Vec::new();
    for (table, pushed) in &summary.results.pushed {
        let pulled = summary
            .results
            .pulled
            .get(table)
            .map_or_else(|| "failed".to_string(), ToString::to_string);
        lines.push(format!("{table:<16}  pushed={pushed:<5}  pulled={pulled}"));
    }

    let queue = &summary.queue;
    lines.push(format!(
        "queue: {} replayed, {} superseded, {} failed, {} dead-lettered, {} newly queued",
        queue.replayed, queue.superseded, queue.failed, queue.dead_lettered, summary.queued
    ));
    if summary.success {
        lines.push("Sync completed".to_string());
    }
    lines
}
