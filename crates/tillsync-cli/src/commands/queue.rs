use crate::cli::QueueCommands;
use crate::commands::common::{
    format_queue_lines, queue_entry_to_item, CommandContext, QueueEntryItem,
};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, ctx: &CommandContext) -> Result<(), CliError> {
    match command {
        QueueCommands::List { dead, json } => run_queue_list(dead, json, ctx).await,
        QueueCommands::Drain => run_queue_drain(ctx).await,
        QueueCommands::Retry { id } => {
            let store = ctx.open_store().await?;
            if !store.retry_dead_letter(id.trim()).await? {
                return Err(CliError::QueueEntryNotFound(id));
            }
            println!("Requeued {}", id.trim());
            Ok(())
        }
        QueueCommands::Discard { id } => {
            let store = ctx.open_store().await?;
            if !store.mark_processed(id.trim()).await? {
                return Err(CliError::QueueEntryNotFound(id));
            }
            println!("Discarded {}", id.trim());
            Ok(())
        }
    }
}

async fn run_queue_list(dead: bool, as_json: bool, ctx: &CommandContext) -> Result<(), CliError> {
    let store = ctx.open_store().await?;
    let entries = if dead {
        store.list_dead_letters().await?
    } else {
        store.list_pending().await?
    };

    if as_json {
        let json_items = entries
            .iter()
            .map(queue_entry_to_item)
            .collect::<Vec<QueueEntryItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for line in format_queue_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

async fn run_queue_drain(ctx: &CommandContext) -> Result<(), CliError> {
    let (engine, user_id) = ctx.open_sync_engine().await?;
    let report = engine.drain_queue(&user_id).await?;
    println!(
        "{} replayed, {} superseded, {} failed, {} dead-lettered",
        report.replayed, report.superseded, report.failed, report.dead_lettered
    );
    Ok(())
}
