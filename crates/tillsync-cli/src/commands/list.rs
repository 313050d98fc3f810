use crate::commands::common::{
    format_record_lines, record_to_list_item, require_table, CommandContext, RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(table: &str, as_json: bool, ctx: &CommandContext) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    require_table(&engine, table)?;
    let records = engine.store().list_records(table).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}
