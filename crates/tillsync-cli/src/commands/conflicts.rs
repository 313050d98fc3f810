use crate::commands::common::{
    format_sync_conflict_lines, sync_conflict_to_item, CommandContext, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_conflicts(
    limit: usize,
    as_json: bool,
    ctx: &CommandContext,
) -> Result<(), CliError> {
    let store = ctx.open_store().await?;
    let conflicts = store.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
