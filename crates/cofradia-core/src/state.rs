//! Shared sync state observed by status indicators.
//!
//! [`SyncStateStore`] owns the single [`SyncState`] for the process. Readers
//! take snapshots or subscribe; only the gateway and the sync engine write,
//! through the setters below. The state is a cache: everything in it can be
//! rebuilt from the durable queue and the network monitor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::models::{Conflict, ConflictId, MutationId};
use crate::network::{ConnectionType, NetworkSnapshot};

/// Progress of the running drain pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub total: usize,
    pub processed: usize,
}

/// Aggregate sync status
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub is_syncing: bool,
    /// Queued mutations with status `pending` or `failed`
    pub pending_count: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    pub sync_progress: SyncProgress,
    pub is_online: bool,
    pub connection_type: ConnectionType,
    pub conflicts: Vec<Conflict>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            is_syncing: false,
            pending_count: 0,
            last_sync: None,
            sync_error: None,
            sync_progress: SyncProgress::default(),
            is_online: true,
            connection_type: ConnectionType::Unknown,
            conflicts: Vec::new(),
        }
    }
}

/// Owner of the process-wide [`SyncState`]
#[derive(Clone, Debug)]
pub struct SyncStateStore {
    tx: Arc<watch::Sender<SyncState>>,
}

impl Default for SyncStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every change; drop it to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    fn update(&self, modify: impl FnOnce(&mut SyncState)) {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            modify(state);
            *state != before
        });
    }

    pub fn set_network(&self, snapshot: NetworkSnapshot) {
        self.update(|state| {
            state.is_online = snapshot.is_online;
            state.connection_type = snapshot.connection_type;
        });
    }

    /// Only ever called with a count freshly read from the queue.
    pub fn set_pending_count(&self, pending_count: usize) {
        self.update(|state| state.pending_count = pending_count);
    }

    pub fn begin_pass(&self, total: usize) {
        self.update(|state| {
            state.is_syncing = true;
            state.sync_progress = SyncProgress {
                total,
                processed: 0,
            };
        });
    }

    pub fn advance(&self) {
        self.update(|state| {
            state.sync_progress.processed =
                (state.sync_progress.processed + 1).min(state.sync_progress.total);
        });
    }

    /// Close a pass: stamp `last_sync`, publish the fresh pending count and
    /// set or clear the error banner.
    pub fn finish_pass(&self, pending_count: usize, sync_error: Option<String>) {
        self.update(|state| {
            state.is_syncing = false;
            state.last_sync = Some(Utc::now());
            state.pending_count = pending_count;
            state.sync_error = sync_error;
        });
    }

    /// Close a pass that could not read the queue at all.
    pub fn abort_pass(&self, sync_error: String) {
        self.update(|state| {
            state.is_syncing = false;
            state.sync_error = Some(sync_error);
        });
    }

    pub fn set_sync_error(&self, sync_error: Option<String>) {
        self.update(|state| state.sync_error = sync_error);
    }

    /// Record a conflict, replacing any earlier one for the same mutation.
    pub fn add_conflict(&self, conflict: Conflict) {
        self.update(|state| {
            state
                .conflicts
                .retain(|existing| existing.mutation_id != conflict.mutation_id);
            state.conflicts.push(conflict);
        });
    }

    pub fn remove_conflict(&self, id: &ConflictId) -> Option<Conflict> {
        let mut removed = None;
        self.update(|state| {
            if let Some(index) = state.conflicts.iter().position(|c| c.id == *id) {
                removed = Some(state.conflicts.remove(index));
            }
        });
        removed
    }

    pub fn remove_conflict_for(&self, mutation_id: &MutationId) {
        self.update(|state| {
            state
                .conflicts
                .retain(|conflict| conflict.mutation_id != *mutation_id);
        });
    }

    pub fn clear_conflicts(&self) {
        self.update(|state| state.conflicts.clear());
    }

    pub fn conflict(&self, id: &ConflictId) -> Option<Conflict> {
        self.tx
            .borrow()
            .conflicts
            .iter()
            .find(|conflict| conflict.id == *id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HoldReason, MutationStatus, OperationKind, QueuedMutation};
    use pretty_assertions::assert_eq;

    fn held_mutation(record_id: &str) -> QueuedMutation {
        QueuedMutation {
            id: MutationId::new(),
            seq: 1,
            target_resource: "members".to_string(),
            record_id: Some(record_id.to_string()),
            operation_kind: OperationKind::Update,
            payload: serde_json::json!({ "id": record_id }),
            base_version: None,
            status: MutationStatus::Failed,
            hold: Some(HoldReason::Conflict),
            last_error: None,
            created_at: 0,
            last_attempt_at: None,
            attempt_count: 1,
        }
    }

    #[test]
    fn pass_lifecycle_updates_progress_and_flags() {
        let store = SyncStateStore::new();

        store.begin_pass(2);
        store.advance();
        let during = store.snapshot();
        assert!(during.is_syncing);
        assert_eq!(
            during.sync_progress,
            SyncProgress {
                total: 2,
                processed: 1
            }
        );

        store.advance();
        store.advance();
        assert_eq!(store.snapshot().sync_progress.processed, 2);

        store.finish_pass(0, None);
        let after = store.snapshot();
        assert!(!after.is_syncing);
        assert!(after.last_sync.is_some());
        assert_eq!(after.sync_error, None);
    }

    #[test]
    fn conflicts_are_keyed_by_mutation() {
        let store = SyncStateStore::new();
        let mutation = held_mutation("m-1");

        store.add_conflict(Conflict::for_mutation(&mutation, HoldReason::Conflict, "first"));
        store.add_conflict(Conflict::for_mutation(&mutation, HoldReason::Conflict, "second"));

        let conflicts = store.snapshot().conflicts;
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].message, "second");

        let removed = store.remove_conflict(&conflicts[0].id).unwrap();
        assert_eq!(removed.record_id.as_deref(), Some("m-1"));
        assert!(store.snapshot().conflicts.is_empty());
    }

    #[test]
    fn clear_conflicts_empties_the_list() {
        let store = SyncStateStore::new();
        store.add_conflict(Conflict::for_mutation(
            &held_mutation("m-1"),
            HoldReason::Conflict,
            "gone",
        ));
        store.add_conflict(Conflict::for_mutation(
            &held_mutation("m-2"),
            HoldReason::Rejected,
            "duplicate",
        ));

        store.clear_conflicts();
        assert!(store.snapshot().conflicts.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_are_notified_of_changes() {
        let store = SyncStateStore::new();
        let mut rx = store.subscribe();

        store.set_pending_count(3);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().pending_count, 3);

        store.set_pending_count(3);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn network_snapshot_is_mirrored() {
        let store = SyncStateStore::new();
        store.set_network(NetworkSnapshot {
            is_online: false,
            round_trip_millis: None,
            connection_type: ConnectionType::Cellular,
        });

        let state = store.snapshot();
        assert!(!state.is_online);
        assert_eq!(state.connection_type, ConnectionType::Cellular);
    }
}
