use chrono::Utc;
use tillsync_core::Record;

use crate::commands::common::{require_table, resolve_payload, CommandContext};
use crate::config::resolve_user;
use crate::error::CliError;

pub async fn run_put(
    table: &str,
    id: &str,
    payload: Option<&str>,
    local_only: bool,
    ctx: &CommandContext,
) -> Result<(), CliError> {
    let payload = resolve_payload(payload)?;
    let engine = ctx.open_engine().await?;
    require_table(&engine, table)?;

    let record = Record::new(id.trim(), payload, Utc::now())?;
    engine.store().put_record(table, &record).await?;
    if local_only {
        println!("Saved {table}/{} locally", record.id);
        return Ok(());
    }

    if !engine.is_configured() {
        return Err(CliError::SyncNotConfigured);
    }
    let user_id = resolve_user(ctx.user.as_deref(), &ctx.env)?;
    let outcome = engine.push_to_cloud(table, &record, &user_id).await?;
    if outcome.superseded {
        println!("Saved {table}/{}; the remote already holds a newer version", record.id);
    } else if outcome.success {
        println!("Saved and pushed {table}/{}", record.id);
    } else if outcome.queued {
        println!("Saved {table}/{}; push queued", record.id);
    } else {
        return Err(CliError::SyncFailed(outcome.error.unwrap_or_default()));
    }
    Ok(())
}
