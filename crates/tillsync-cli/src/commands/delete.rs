use crate::commands::common::{require_table, CommandContext};
use crate::error::CliError;

pub async fn run_delete(table: &str, id: &str, ctx: &CommandContext) -> Result<(), CliError> {
    let (engine, user_id) = ctx.open_sync_engine().await?;
    require_table(&engine, table)?;

    let outcome = engine.delete_from_cloud(table, id.trim(), &user_id).await?;
    if outcome.success {
        println!("Deleted {table}/{}", id.trim());
    } else if outcome.queued {
        println!("Deleted {table}/{} locally; remote delete queued", id.trim());
    } else {
        return Err(CliError::SyncFailed(outcome.error.unwrap_or_default()));
    }
    Ok(())
}
