use crate::commands::common::SyncContext;
use crate::error::CliError;

pub async fn run_purge(ctx: &SyncContext) -> Result<u64, CliError> {
    let purged = ctx.queue.purge_synced().await?;
    println!("Purged {purged} synced mutation(s)");
    Ok(purged)
}
