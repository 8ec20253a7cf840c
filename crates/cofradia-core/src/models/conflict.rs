//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{HoldReason, MutationId, QueuedMutation};

/// Conflict identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A queued mutation that could not be applied cleanly against remote state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    /// Mutation held back by this conflict
    pub mutation_id: MutationId,
    /// Target resource (table) name
    pub table: String,
    pub record_id: Option<String>,
    pub reason: HoldReason,
    pub message: String,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
}

impl Conflict {
    /// Build a conflict for a held mutation.
    pub fn for_mutation(
        mutation: &QueuedMutation,
        reason: HoldReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            mutation_id: mutation.id,
            table: mutation.target_resource.clone(),
            record_id: mutation.record_id.clone(),
            reason,
            message: message.into(),
            detected_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
