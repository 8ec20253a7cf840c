use cofradia_core::PassOutcome;

use crate::commands::common::SyncContext;
use crate::error::CliError;

pub async fn run_sync(ctx: &SyncContext) -> Result<PassOutcome, CliError> {
    ctx.refresh_network().await;
    let engine = ctx.engine()?;
    engine.restore().await?;

    let outcome = engine.sync_now().await?;
    let pending = ctx.state.snapshot().pending_count;
    match outcome {
        PassOutcome::Completed(report) => println!(
            "Sync completed: {} synced, {} failed, {} conflict(s), {pending} pending",
            report.synced, report.failed, report.conflicts
        ),
        PassOutcome::Offline => {
            println!("Backend unreachable; {pending} change(s) remain queued");
        }
        PassOutcome::AlreadyRunning => println!("A sync pass is already running"),
    }
    Ok(outcome)
}
