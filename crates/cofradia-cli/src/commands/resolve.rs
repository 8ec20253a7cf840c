use cofradia_core::Resolution;

use crate::commands::common::{parse_mutation_id, SyncContext};
use crate::error::CliError;

pub async fn run_resolve(
    ctx: &SyncContext,
    mutation_id: &str,
    resolution: Resolution,
) -> Result<(), CliError> {
    let mutation_id = parse_mutation_id(mutation_id)?;
    let engine = ctx.engine()?;
    engine.restore().await?;

    engine.resolve_mutation(&mutation_id, resolution).await?;
    match resolution {
        Resolution::Retry => println!("Mutation {mutation_id} will be retried on the next sync"),
        Resolution::Discard => println!("Mutation {mutation_id} discarded"),
    }
    Ok(())
}
