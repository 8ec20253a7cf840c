//! Cofradia CLI - inspect and drive the offline mutation queue
//!
//! Writes submitted here follow the same path as the console: applied live
//! when the backend answers quickly, queued locally otherwise.

mod cli;
mod commands;
mod error;

use clap::Parser;
use cofradia_core::SyncSettings;
use tracing_subscriber::filter::Directive;

use crate::cli::{resolution_from_flags, Cli, Commands};
use crate::commands::common::{build_mutation, resolve_db_path, SyncContext};
use crate::commands::conflicts::run_conflicts;
use crate::commands::purge::run_purge;
use crate::commands::queue::run_queue;
use crate::commands::resolve::run_resolve;
use crate::commands::status::run_status;
use crate::commands::submit::run_submit;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
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

    let directive = "cofradia=info"
        .parse::<Directive>()
        .map_err(|error| CliError::Logging(error.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = SyncSettings::from_env()?;
    let db_path = resolve_db_path(cli.db_path, &settings);
    let ctx = SyncContext::open(settings, &db_path).await?;

    match cli.command {
        Commands::Submit {
            resource,
            operation,
            payload,
            record_id,
            base_version,
        } => {
            let mutation =
                build_mutation(&resource, operation.into(), &payload, record_id, base_version)?;
            run_submit(&ctx, mutation).await?;
        }
        Commands::Queue { status, json } => run_queue(&ctx, status.map(Into::into), json).await?,
        Commands::Status { json } => run_status(&ctx, &db_path, json).await?,
        Commands::Sync => {
            run_sync(&ctx).await?;
        }
        Commands::Conflicts { json } => run_conflicts(&ctx, json).await?,
        Commands::Resolve {
            mutation_id,
            retry,
            discard: _,
        } => run_resolve(&ctx, &mutation_id, resolution_from_flags(retry)).await?,
        Commands::Purge => {
            run_purge(&ctx).await?;
        }
        Commands::Watch => run_watch(&ctx).await?,
    }

    Ok(())
}
