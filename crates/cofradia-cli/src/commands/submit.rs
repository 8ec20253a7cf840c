use cofradia_core::{NewMutation, Outcome};
use serde_json::Value;

use crate::commands::common::SyncContext;
use crate::error::CliError;

pub async fn run_submit(
    ctx: &SyncContext,
    mutation: NewMutation,
) -> Result<Outcome<Value>, CliError> {
    ctx.refresh_network().await;
    let gateway = ctx.gateway()?;

    let outcome = gateway.submit(mutation).await?;
    match &outcome {
        Outcome::Applied(value) => println!("Applied: {}", serde_json::to_string(value)?),
        Outcome::Queued { mutation_id, .. } => {
            println!("Queued {mutation_id}; it will sync when the connection returns");
        }
    }
    Ok(outcome)
}
