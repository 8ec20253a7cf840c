//! Queue drain: replays offline mutations against the remote store.
//!
//! A pass walks the replayable rows in enqueue order. Mutations that share a
//! `(resource, record_id)` key are applied strictly in order: once one of them
//! fails or is held, the rest of that key waits for a later pass.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::gateway::DEFAULT_REMOTE_TIMEOUT;
use crate::models::{Conflict, ConflictId, HoldReason, MutationId, MutationStatus, QueuedMutation};
use crate::network::NetworkMonitor;
use crate::notify::{Notification, Notifier};
use crate::remote::{with_timeout, ErrorClass, RemoteError, RemoteStore};
use crate::services::QueueService;
use crate::state::SyncStateStore;
use crate::util::error_excerpt;
use crate::{Error, Result};

/// Default period of the background drain check.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// What to do with a held mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Put it back in the queue for the next pass
    Retry,
    /// Drop it; the change is lost
    Discard,
}

/// Counters for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub attempted: usize,
    pub synced: usize,
    /// Network-class failures; retried on a later pass
    pub failed: usize,
    /// Newly held mutations
    pub conflicts: usize,
    /// Held, or waiting behind an earlier mutation on the same record
    pub skipped: usize,
    /// Left untouched because the link dropped mid-pass
    pub deferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass holds the guard; this trigger was dropped
    AlreadyRunning,
    Offline,
}

/// Resets the pass guard even if the pass future is dropped.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type OrderingKey = (String, String);

fn owned_key(mutation: &QueuedMutation) -> Option<OrderingKey> {
    mutation
        .ordering_key()
        .map(|(resource, record_id)| (resource.to_string(), record_id.to_string()))
}

/// Replays the durable queue and manages held mutations
#[derive(Clone)]
pub struct SyncEngine {
    queue: QueueService,
    network: NetworkMonitor,
    state: SyncStateStore,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    running: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        queue: QueueService,
        network: NetworkMonitor,
        state: SyncStateStore,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            network,
            state,
            remote,
            notifier,
            timeout: DEFAULT_REMOTE_TIMEOUT,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Limit for each replayed remote call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub const fn state(&self) -> &SyncStateStore {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one drain pass now.
    ///
    /// Returns `Err` only when the local queue could not be read or written;
    /// remote failures are recorded on the rows and in the shared state.
    pub async fn sync_now(&self) -> Result<PassOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync pass already running; trigger dropped");
            return Ok(PassOutcome::AlreadyRunning);
        }
        let _guard = PassGuard(&self.running);

        let network = self.network.get_state();
        self.state.set_network(network);
        if !network.is_online {
            tracing::debug!("Sync skipped: offline");
            return Ok(PassOutcome::Offline);
        }

        match self.drain().await {
            Ok(report) => Ok(PassOutcome::Completed(report)),
            Err(error) => {
                tracing::error!("Sync pass aborted: {error}");
                self.state.abort_pass(error.to_string());
                if let Err(refresh) = self.refresh_pending().await {
                    tracing::warn!("Pending count not refreshed after abort: {refresh}");
                }
                Err(error)
            }
        }
    }

    async fn drain(&self) -> Result<PassReport> {
        // Rows a failed pass left in flight would otherwise vanish until reopen.
        self.queue.recover_in_flight().await?;
        let batch = self.queue.list_replayable().await?;
        let attemptable = batch.iter().filter(|mutation| !mutation.is_held()).count();
        self.state.begin_pass(attemptable);
        if attemptable > 0 {
            tracing::info!("Sync pass started: {attemptable} change(s) to upload");
        }

        let mut report = PassReport::default();
        let mut blocked: HashSet<OrderingKey> = HashSet::new();
        let mut last_error: Option<String> = None;
        let mut link_lost = false;

        for mutation in &batch {
            let key = owned_key(mutation);
            if mutation.is_held() || key.as_ref().is_some_and(|key| blocked.contains(key)) {
                tracing::debug!("Skipping {} ({})", mutation.id, mutation.status);
                blocked.extend(key);
                report.skipped += 1;
                continue;
            }
            // Once the link drops, the rest of the batch waits for the next pass.
            if link_lost || !self.network.get_state().is_online {
                link_lost = true;
                blocked.extend(key);
                report.deferred += 1;
                continue;
            }

            report.attempted += 1;
            self.queue.mark_in_flight(&mutation.id).await?;
            tracing::debug!(
                "Replaying {} {} on {}",
                mutation.id,
                mutation.operation_kind,
                mutation.target_resource
            );

            match with_timeout(self.timeout, self.remote.apply(&mutation.as_request())).await {
                Ok(_) => {
                    self.complete(mutation).await?;
                    report.synced += 1;
                    self.state.advance();
                }
                Err(error) if error.is_retryable() => {
                    tracing::warn!("Sync of {} failed, will retry: {error}", mutation.id);
                    let message = error_excerpt(&error.to_string());
                    self.queue.mark_failed(&mutation.id, None, &message).await?;
                    last_error = Some(message);
                    blocked.extend(key);
                    report.failed += 1;
                }
                Err(error) => {
                    self.hold(mutation, &error).await?;
                    blocked.extend(key);
                    report.conflicts += 1;
                }
            }
        }

        let pending = self.queue.pending_count().await?;
        let unresolved = self.queue.count(MutationStatus::Failed).await?;
        let held = self.queue.list_held().await?.len();
        let sync_error = (unresolved > 0).then(|| {
            let mut message = format!("{unresolved} change(s) could not be synced");
            if held > 0 {
                message.push_str(&format!(" ({held} held as conflicts)"));
            }
            if let Some(error) = last_error {
                message.push_str(": ");
                message.push_str(&error);
            }
            message
        });
        self.state.finish_pass(pending, sync_error.clone());

        let failed_now = report.failed + report.conflicts;
        if let Some(message) = sync_error.filter(|_| failed_now > 0) {
            self.notifier.notify(Notification::SyncFailed {
                failed: failed_now,
                message,
            });
        } else if report.synced > 0 {
            self.notifier.notify(Notification::SyncCompleted {
                synced: report.synced,
            });
        }
        if report.attempted > 0 || report.deferred > 0 {
            tracing::info!(
                "Sync pass finished: {} synced, {} failed, {} conflict(s), {} pending",
                report.synced,
                report.failed,
                report.conflicts,
                pending
            );
        }

        Ok(report)
    }

    async fn complete(&self, mutation: &QueuedMutation) -> Result<()> {
        self.queue
            .update_status(&mutation.id, MutationStatus::Synced, None)
            .await?;
        // A synced row left behind is only a purge candidate, never replayed.
        if let Err(error) = self.queue.remove(&mutation.id).await {
            tracing::warn!("Synced mutation {} left in queue: {error}", mutation.id);
        }
        Ok(())
    }

    async fn hold(&self, mutation: &QueuedMutation, error: &RemoteError) -> Result<()> {
        let reason = match error.class() {
            ErrorClass::Conflict => HoldReason::Conflict,
            ErrorClass::Domain | ErrorClass::Network => HoldReason::Rejected,
        };
        let message = error_excerpt(&error.to_string());
        self.queue
            .mark_failed(&mutation.id, Some(reason), &message)
            .await?;

        tracing::warn!(
            "Sync {reason} on {} {}: {message}",
            mutation.target_resource,
            mutation.record_id.as_deref().unwrap_or("(new record)")
        );
        let conflict = Conflict::for_mutation(mutation, reason, message);
        self.state.add_conflict(conflict.clone());
        self.notifier.notify(Notification::ConflictDetected(conflict));
        Ok(())
    }

    /// Rebuild conflicts from held rows and publish the pending count.
    ///
    /// Call once at startup; conflicts live only in memory otherwise.
    pub async fn restore(&self) -> Result<usize> {
        let held = self.queue.list_held().await?;
        self.state.clear_conflicts();
        for mutation in &held {
            let reason = mutation.hold.unwrap_or(HoldReason::Conflict);
            let message = mutation
                .last_error
                .clone()
                .unwrap_or_else(|| format!("{reason} reported by remote store"));
            self.state
                .add_conflict(Conflict::for_mutation(mutation, reason, message));
        }
        self.refresh_pending().await?;
        if !held.is_empty() {
            tracing::info!("Restored {} unresolved sync conflict(s)", held.len());
        }
        Ok(held.len())
    }

    /// Resolve a conflict from the current list.
    pub async fn resolve_conflict(&self, id: &ConflictId, resolution: Resolution) -> Result<()> {
        let conflict = self
            .state
            .conflict(id)
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        self.resolve_mutation(&conflict.mutation_id, resolution)
            .await
    }

    /// Resolve the held mutation directly.
    pub async fn resolve_mutation(
        &self,
        mutation_id: &MutationId,
        resolution: Resolution,
    ) -> Result<()> {
        let mutation = self
            .queue
            .get(mutation_id)
            .await?
            .filter(QueuedMutation::is_held)
            .ok_or_else(|| Error::NotFound(format!("held mutation {mutation_id}")))?;

        match resolution {
            Resolution::Retry => {
                self.queue.release(&mutation.id).await?;
                tracing::info!("Mutation {} released for retry", mutation.id);
            }
            Resolution::Discard => {
                self.queue.remove(&mutation.id).await?;
                tracing::info!(
                    "Mutation {} discarded ({} on {})",
                    mutation.id,
                    mutation.operation_kind,
                    mutation.target_resource
                );
            }
        }

        self.state.remove_conflict_for(&mutation.id);
        self.refresh_pending().await?;
        Ok(())
    }

    /// Dismiss a conflict from the list; the mutation itself stays held.
    pub fn remove_conflict(&self, id: &ConflictId) -> Option<Conflict> {
        self.state.remove_conflict(id)
    }

    /// Dismiss every conflict; held mutations stay held.
    pub fn clear_conflicts(&self) {
        self.state.clear_conflicts();
    }

    /// Delete `synced` rows left behind by interrupted cleanups.
    pub async fn purge_synced(&self) -> Result<u64> {
        let purged = self.queue.purge_synced().await?;
        if purged > 0 {
            tracing::info!("Purged {purged} synced mutation(s)");
        }
        self.refresh_pending().await?;
        Ok(purged)
    }

    async fn refresh_pending(&self) -> Result<usize> {
        let pending = self.queue.pending_count().await?;
        self.state.set_pending_count(pending);
        Ok(pending)
    }
}

/// Background trigger loop for a [`SyncEngine`]
pub struct SyncWorker {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Drain on reconnect, and every `interval` while online with work queued.
    pub fn spawn(engine: SyncEngine, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let mut network = engine.network().subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut was_online = network.borrow_and_update().is_online;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    changed = network.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = *network.borrow_and_update();
                        engine.state().set_network(snapshot);
                        if snapshot.is_online && !was_online {
                            run_pass(&engine, "reconnect").await;
                        }
                        was_online = snapshot.is_online;
                    }
                    _ = ticker.tick() => {
                        if engine.network().get_state().is_online
                            && engine.state().snapshot().pending_count > 0
                        {
                            run_pass(&engine, "interval").await;
                        }
                    }
                }
            }
            tracing::debug!("Sync worker stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    /// Stop the loop and wait for an in-progress pass to finish.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(error) = (&mut self.handle).await {
            tracing::warn!("Sync worker ended abnormally: {error}");
        }
    }
}

async fn run_pass(engine: &SyncEngine, trigger: &str) {
    match engine.sync_now().await {
        Ok(PassOutcome::Completed(report)) => {
            tracing::debug!("Sync pass ({trigger}): {report:?}");
        }
        Ok(outcome) => tracing::debug!("Sync pass ({trigger}) not run: {outcome:?}"),
        Err(error) => tracing::error!("Sync pass ({trigger}) failed: {error}"),
    }
}
