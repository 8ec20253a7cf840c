use cofradia_core::QueuedMutation;
use serde::Serialize;

use crate::commands::common::{format_timestamp, record_label, SyncContext};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub mutation_id: String,
    pub resource: String,
    pub record_id: Option<String>,
    pub operation: String,
    pub reason: String,
    pub message: Option<String>,
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
}

pub fn conflict_item(mutation: &QueuedMutation) -> ConflictItem {
    ConflictItem {
        mutation_id: mutation.id.to_string(),
        resource: mutation.target_resource.clone(),
        record_id: mutation.record_id.clone(),
        operation: mutation.operation_kind.to_string(),
        reason: mutation
            .hold
            .map_or_else(|| "unknown".to_string(), |hold| hold.to_string()),
        message: mutation.last_error.clone(),
        attempts: mutation.attempt_count,
        last_attempt_at: mutation.last_attempt_at,
    }
}

pub fn format_conflict_lines(held: &[QueuedMutation]) -> Vec<String> {
    held.iter()
        .map(|mutation| {
            format!(
                "{}  {}  {:<8}  {:<6}  {}  {}",
                mutation
                    .last_attempt_at
                    .map_or_else(|| "-".to_string(), format_timestamp),
                mutation.id,
                mutation.hold.map_or("unknown", |hold| hold.as_str()),
                mutation.operation_kind,
                record_label(mutation),
                mutation.last_error.as_deref().unwrap_or("")
            )
        })
        .collect()
}

pub async fn run_conflicts(ctx: &SyncContext, as_json: bool) -> Result<(), CliError> {
    let held = ctx.queue.list_held().await?;

    if as_json {
        let json_items = held.iter().map(conflict_item).collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if held.is_empty() {
        println!("No sync conflicts.");
        return Ok(());
    }

    for line in format_conflict_lines(&held) {
        println!("{line}");
    }
    println!("Resolve with `cofradia resolve <mutation-id> --retry|--discard`.");
    Ok(())
}
