use std::path::Path;

use serde::Serialize;

use crate::commands::common::SyncContext;
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub db_path: String,
    pub remote_url: Option<String>,
    /// `None` when no backend is configured
    pub is_online: Option<bool>,
    pub round_trip_millis: Option<u32>,
    pub pending_count: usize,
    pub held_count: usize,
}

pub async fn collect_status(ctx: &SyncContext, db_path: &Path) -> Result<StatusReport, CliError> {
    ctx.refresh_network().await;

    let pending_count = ctx.queue.pending_count().await?;
    let held_count = ctx.queue.list_held().await?.len();
    let network = ctx.network.get_state();
    let (is_online, round_trip_millis) = if ctx.has_remote() {
        (Some(network.is_online), network.round_trip_millis)
    } else {
        (None, None)
    };

    Ok(StatusReport {
        db_path: db_path.display().to_string(),
        remote_url: ctx.settings.remote.as_ref().map(|remote| remote.url.clone()),
        is_online,
        round_trip_millis,
        pending_count,
        held_count,
    })
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let connection = match (report.is_online, report.round_trip_millis) {
        (None, _) => "not configured".to_string(),
        (Some(false), _) => "offline".to_string(),
        (Some(true), Some(rtt)) => format!("online ({rtt}ms)"),
        (Some(true), None) => "online".to_string(),
    };

    vec![
        format!("Queue:     {}", report.db_path),
        format!(
            "Backend:   {}",
            report.remote_url.as_deref().unwrap_or("(none)")
        ),
        format!("Network:   {connection}"),
        format!("Pending:   {}", report.pending_count),
        format!("Conflicts: {}", report.held_count),
    ]
}

pub async fn run_status(ctx: &SyncContext, db_path: &Path, as_json: bool) -> Result<(), CliError> {
    let report = collect_status(ctx, db_path).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}
