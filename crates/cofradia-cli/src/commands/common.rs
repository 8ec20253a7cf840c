use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use cofradia_core::config::{ConfigError, REMOTE_URL_VAR};
use cofradia_core::network::LatencyProbe;
use cofradia_core::remote::{HttpProbe, PostgrestStore};
use cofradia_core::{
    MutationGateway, MutationId, NetworkMonitor, NewMutation, OperationKind, QueueService,
    QueuedMutation, RemoteStore, SyncEngine, SyncSettings, SyncStateStore, TracingNotifier,
};
use serde::Serialize;

use crate::error::CliError;

/// Everything a command may need, wired once per invocation
pub struct SyncContext {
    pub settings: SyncSettings,
    pub queue: QueueService,
    pub network: NetworkMonitor,
    pub state: SyncStateStore,
    remote: Option<Arc<dyn RemoteStore>>,
    probe: Option<Arc<dyn LatencyProbe>>,
}

impl SyncContext {
    pub fn new(
        settings: SyncSettings,
        queue: QueueService,
        remote: Option<Arc<dyn RemoteStore>>,
        probe: Option<Arc<dyn LatencyProbe>>,
    ) -> Self {
        let network = NetworkMonitor::default().with_good_rtt(settings.good_rtt);
        Self {
            settings,
            queue,
            network,
            state: SyncStateStore::new(),
            remote,
            probe,
        }
    }

    /// Open the queue and, when configured, the PostgREST backend.
    pub async fn open(settings: SyncSettings, db_path: &Path) -> Result<Self, CliError> {
        let queue = QueueService::open_path(db_path).await?;

        let (remote, probe) = match settings.remote.as_ref() {
            Some(remote) => {
                let store = PostgrestStore::new(
                    remote.url.clone(),
                    remote.api_key.clone(),
                    settings.remote_timeout,
                )?;
                let probe = HttpProbe::new(remote.url.clone(), settings.remote_timeout)?;
                (
                    Some(Arc::new(store) as Arc<dyn RemoteStore>),
                    Some(Arc::new(probe) as Arc<dyn LatencyProbe>),
                )
            }
            None => (None, None),
        };

        Ok(Self::new(settings, queue, remote, probe))
    }

    pub const fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn require_remote(&self) -> Result<Arc<dyn RemoteStore>, CliError> {
        self.remote
            .clone()
            .ok_or(CliError::Config(ConfigError::MissingVar(REMOTE_URL_VAR)))
    }

    pub fn probe(&self) -> Option<Arc<dyn LatencyProbe>> {
        self.probe.clone()
    }

    /// Probe the backend once so the network snapshot is current.
    pub async fn refresh_network(&self) {
        let Some(probe) = self.probe.as_ref() else {
            return;
        };
        match probe.probe().await {
            Ok(rtt) => self.network.record_round_trip(rtt),
            Err(error) => {
                tracing::debug!("Backend probe failed: {error}");
                self.network.set_online(false);
            }
        }
    }

    pub fn engine(&self) -> Result<SyncEngine, CliError> {
        Ok(SyncEngine::new(
            self.queue.clone(),
            self.network.clone(),
            self.state.clone(),
            self.require_remote()?,
            Arc::new(TracingNotifier),
        )
        .with_timeout(self.settings.remote_timeout))
    }

    pub fn gateway(&self) -> Result<MutationGateway, CliError> {
        Ok(MutationGateway::new(
            self.queue.clone(),
            self.network.clone(),
            self.state.clone(),
            self.require_remote()?,
            Arc::new(TracingNotifier),
        )
        .with_timeout(self.settings.remote_timeout))
    }
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub seq: i64,
    pub resource: String,
    pub record_id: Option<String>,
    pub operation: String,
    pub status: String,
    pub hold: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub relative_time: String,
}

pub fn queue_item(mutation: &QueuedMutation, now_ms: i64) -> QueueItem {
    QueueItem {
        id: mutation.id.to_string(),
        seq: mutation.seq,
        resource: mutation.target_resource.clone(),
        record_id: mutation.record_id.clone(),
        operation: mutation.operation_kind.to_string(),
        status: mutation.status.to_string(),
        hold: mutation.hold.map(|hold| hold.to_string()),
        attempts: mutation.attempt_count,
        last_error: mutation.last_error.clone(),
        created_at: mutation.created_at,
        relative_time: format_relative_time(mutation.created_at, now_ms),
    }
}

pub fn format_queue_lines(mutations: &[QueuedMutation], now_ms: i64) -> Vec<String> {
    mutations
        .iter()
        .map(|mutation| {
            let mut line = format!(
                "{:>4}  {}  {:<9}  {:<6}  {}  attempts={}  {}",
                mutation.seq,
                mutation.id,
                mutation.status,
                mutation.operation_kind,
                record_label(mutation),
                mutation.attempt_count,
                format_relative_time(mutation.created_at, now_ms)
            );
            if let Some(hold) = mutation.hold {
                line.push_str(&format!("  [{hold}]"));
            }
            line
        })
        .collect()
}

pub fn record_label(mutation: &QueuedMutation) -> String {
    format!(
        "{}/{}",
        mutation.target_resource,
        mutation.record_id.as_deref().unwrap_or("(new)")
    )
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Build the mutation for `cofradia submit`.
pub fn build_mutation(
    resource: &str,
    operation: OperationKind,
    payload: &str,
    record_id: Option<String>,
    base_version: Option<String>,
) -> Result<NewMutation, CliError> {
    let resource = resource.trim();
    if resource.is_empty() {
        return Err(
            cofradia_core::Error::InvalidInput("resource cannot be empty".to_string()).into(),
        );
    }
    let payload = serde_json::from_str(payload).map_err(CliError::InvalidPayload)?;

    let mut mutation = NewMutation::new(resource, operation, payload);
    if let Some(record_id) = record_id.filter(|id| !id.trim().is_empty()) {
        mutation = mutation.with_record_id(record_id.trim());
    }
    if let Some(base_version) = base_version.filter(|version| !version.trim().is_empty()) {
        mutation = mutation.with_base_version(base_version.trim());
    }
    if mutation.record_id.is_none() && operation != OperationKind::Create {
        return Err(cofradia_core::Error::InvalidInput(format!(
            "{operation} needs a record id (payload `id` or --record-id)"
        ))
        .into());
    }
    Ok(mutation)
}

pub fn parse_mutation_id(value: &str) -> Result<MutationId, CliError> {
    value
        .trim()
        .parse::<MutationId>()
        .map_err(|_| CliError::InvalidMutationId(value.trim().to_string()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, settings: &SyncSettings) -> PathBuf {
    cli_db_path
        .or_else(|| settings.db_path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cofradia")
        .join("queue.db")
}
