use tillsync_core::models::TableChangeKind;

use crate::commands::common::CommandContext;
use crate::error::CliError;

pub async fn run_watch(ctx: &CommandContext) -> Result<(), CliError> {
    let (engine, user_id) = ctx.open_sync_engine().await?;
    let subscription = engine
        .subscribe_to_realtime_changes(&user_id, |change| {
            let verb = match change.kind {
                TableChangeKind::Upserted => "upserted",
                TableChangeKind::Deleted => "deleted",
            };
            println!("{verb:<8}  {}/{}", change.table, change.record_id);
        })
        .await?;

    println!("Watching for changes. Press Ctrl-C to stop.");
    let lost = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            false
        }
        () = subscription.closed() => true,
    };
    if lost {
        return Err(CliError::FeedLost);
    }
    subscription.unsubscribe().await;
    Ok(())
}
