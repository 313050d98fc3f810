use tillsync_core::util::parse_iso8601;

use crate::commands::common::{require_table, CommandContext};
use crate::error::CliError;

pub async fn run_pull(
    table: &str,
    since: Option<&str>,
    as_json: bool,
    ctx: &CommandContext,
) -> Result<(), CliError> {
    let since = since
        .map(|value| parse_iso8601(value).ok_or_else(|| CliError::InvalidTimestamp(value.into())))
        .transpose()?;
    let (engine, user_id) = ctx.open_sync_engine().await?;
    require_table(&engine, table)?;

    let records = engine.pull_from_cloud(table, &user_id, since).await?;
    let report = engine.merge_cloud_data(table, &records).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{table}: fetched {}, applied {}, kept local {}, tombstoned {}",
            records.len(),
            report.applied,
            report.kept_local,
            report.tombstoned
        );
    }
    Ok(())
}
