use cofradia_core::{MutationStatus, QueueService, QueuedMutation};

use crate::commands::common::{format_queue_lines, now_ms, queue_item, QueueItem, SyncContext};
use crate::error::CliError;

/// Mutations with `status`, or everything still owed to the backend.
pub async fn load_queue(
    queue: &QueueService,
    status: Option<MutationStatus>,
) -> Result<Vec<QueuedMutation>, CliError> {
    let mutations = match status {
        Some(status) => queue.list_by_status(status).await?,
        None => queue.list_replayable().await?,
    };
    Ok(mutations)
}

pub async fn run_queue(
    ctx: &SyncContext,
    status: Option<MutationStatus>,
    as_json: bool,
) -> Result<(), CliError> {
    let mutations = load_queue(&ctx.queue, status).await?;
    let now = now_ms();

    if as_json {
        let json_items = mutations
            .iter()
            .map(|mutation| queue_item(mutation, now))
            .collect::<Vec<QueueItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if mutations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&mutations, now) {
        println!("{line}");
    }
    Ok(())
}
