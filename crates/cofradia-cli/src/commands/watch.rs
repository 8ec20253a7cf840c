use cofradia_core::{SyncState, SyncWorker};

use crate::commands::common::{format_timestamp, SyncContext};
use crate::error::CliError;

pub fn format_state_line(state: &SyncState) -> String {
    let network = if state.is_online { "online" } else { "offline" };
    let activity = if state.is_syncing {
        format!(
            "syncing {}/{}",
            state.sync_progress.processed, state.sync_progress.total
        )
    } else {
        "idle".to_string()
    };
    let last_sync = state.last_sync.map_or_else(
        || "never".to_string(),
        |at| format_timestamp(at.timestamp_millis()),
    );

    let mut line = format!(
        "{network}  {activity}  pending={}  conflicts={}  last_sync={last_sync}",
        state.pending_count,
        state.conflicts.len()
    );
    if let Some(error) = state.sync_error.as_deref() {
        line.push_str("  error=");
        line.push_str(error);
    }
    line
}

pub async fn run_watch(ctx: &SyncContext) -> Result<(), CliError> {
    let engine = ctx.engine()?;
    engine.restore().await?;

    let probe_task = ctx
        .probe()
        .map(|probe| ctx.network.spawn_probe(probe, ctx.settings.probe_interval));
    let worker = SyncWorker::spawn(engine, ctx.settings.sync_interval);
    let mut updates = ctx.state.subscribe();

    println!("Watching sync state (Ctrl-C to stop)");
    println!("{}", format_state_line(&updates.borrow_and_update()));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = format_state_line(&updates.borrow_and_update());
                println!("{line}");
            }
        }
    }

    worker.shutdown().await;
    if let Some(task) = probe_task {
        task.abort();
    }
    Ok(())
}
