//! Queued mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for a queued mutation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Create a new unique mutation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of write a mutation performs against the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "insert" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown operation kind '{other}'"
            ))),
        }
    }
}

/// Lifecycle of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Waiting for the next drain pass
    Pending,
    /// Currently being applied against the remote store
    InFlight,
    /// Applied remotely; terminal
    Synced,
    /// Last attempt failed
    Failed,
}

impl MutationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Whether a drain pass should consider this status at all.
    pub const fn is_replayable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!(
                "unknown mutation status '{other}'"
            ))),
        }
    }
}

/// Why a failed mutation is held back from automatic retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    /// Remote state diverged from what the mutation was built against
    Conflict,
    /// Remote store rejected the mutation on business rules
    Rejected,
}

impl HoldReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HoldReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conflict" => Ok(Self::Conflict),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::InvalidInput(format!("unknown hold reason '{other}'"))),
        }
    }
}

/// Input for [`crate::db::MutationQueue::enqueue`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMutation {
    pub target_resource: String,
    pub operation_kind: OperationKind,
    pub record_id: Option<String>,
    pub payload: serde_json::Value,
    pub base_version: Option<String>,
}

impl NewMutation {
    /// Build a mutation, taking the record key from the payload's `id` field.
    pub fn new(
        target_resource: impl Into<String>,
        operation_kind: OperationKind,
        payload: serde_json::Value,
    ) -> Self {
        let record_id = record_id_from_payload(&payload);
        Self {
            target_resource: target_resource.into(),
            operation_kind,
            record_id,
            payload,
            base_version: None,
        }
    }

    #[must_use]
    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Remote version (usually `updated_at`) the change was made against.
    #[must_use]
    pub fn with_base_version(mut self, base_version: impl Into<String>) -> Self {
        self.base_version = Some(base_version.into());
        self
    }
}

/// A write persisted locally until it can be applied remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: MutationId,
    /// Local insertion order
    pub seq: i64,
    pub target_resource: String,
    pub record_id: Option<String>,
    pub operation_kind: OperationKind,
    pub payload: serde_json::Value,
    pub base_version: Option<String>,
    pub status: MutationStatus,
    pub hold: Option<HoldReason>,
    pub last_error: Option<String>,
    /// Unix ms
    pub created_at: i64,
    /// Unix ms
    pub last_attempt_at: Option<i64>,
    pub attempt_count: u32,
}

impl QueuedMutation {
    /// Key that orders this mutation against others on the same record.
    ///
    /// Mutations without a record id never wait on each other.
    pub fn ordering_key(&self) -> Option<(&str, &str)> {
        self.record_id
            .as_deref()
            .map(|record_id| (self.target_resource.as_str(), record_id))
    }

    /// Held mutations stay `failed` until someone resolves them.
    pub const fn is_held(&self) -> bool {
        self.hold.is_some()
    }

    /// The write this mutation replays.
    pub fn as_request(&self) -> NewMutation {
        NewMutation {
            target_resource: self.target_resource.clone(),
            operation_kind: self.operation_kind,
            record_id: self.record_id.clone(),
            payload: self.payload.clone(),
            base_version: self.base_version.clone(),
        }
    }
}

fn record_id_from_payload(payload: &serde_json::Value) -> Option<String> {
    match payload.get("id")? {
        serde_json::Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
