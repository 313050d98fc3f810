//! Tillsync CLI - operator surface for the local-first sync engine
//!
//! Runs sync passes, inspects the local store and sync queue, and watches the
//! realtime feed from the terminal.

mod cli;
mod commands;
mod config;
mod error;
#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::common::CommandContext;
use crate::commands::completions::run_completions;
use crate::commands::conflicts::run_conflicts;
use crate::commands::delete::run_delete;
use crate::commands::list::run_list;
use crate::commands::pull::run_pull;
use crate::commands::put::run_put;
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::config::{resolve_db_path, EnvOverrides};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tillsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = EnvOverrides::from_env();
    let ctx = CommandContext {
        db_path: resolve_db_path(cli.db_path, &env),
        config_path: cli.config,
        user: cli.user,
        env,
    };

    match cli.command {
        Some(Commands::Sync { json }) => run_sync(json, &ctx).await?,
        Some(Commands::Status { json }) => run_status(json, &ctx).await?,
        Some(Commands::Pull { table, since, json }) => {
            run_pull(&table, since.as_deref(), json, &ctx).await?;
        }
        Some(Commands::Put {
            table,
            id,
            payload,
            local_only,
        }) => run_put(&table, &id, payload.as_deref(), local_only, &ctx).await?,
        Some(Commands::Delete { table, id }) => run_delete(&table, &id, &ctx).await?,
        Some(Commands::List { table, json }) => run_list(&table, json, &ctx).await?,
        Some(Commands::Queue { command }) => run_queue(command, &ctx).await?,
        Some(Commands::Conflicts { limit, json }) => run_conflicts(limit, json, &ctx).await?,
        Some(Commands::Watch) => run_watch(&ctx).await?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
