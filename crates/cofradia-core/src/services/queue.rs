//! Shared queue service wrapper used by the gateway, the sync engine, and UI readers.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, LibSqlMutationQueue, MutationQueue};
use crate::models::{HoldReason, MutationId, MutationStatus, NewMutation, QueuedMutation};
use crate::Result;

/// Thread-safe handle over the durable mutation queue.
///
/// Every call takes the connection lock for the duration of one statement, so
/// concurrent enqueues are serialized and each receives its own row.
#[derive(Clone)]
pub struct QueueService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl QueueService {
    /// Open the queue at the given filesystem path.
    ///
    /// Mutations left `in_flight` by an interrupted pass are returned to
    /// `pending` so they are delivered again.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await.map_err(|error| {
            tracing::error!(
                "Mutation queue at {} is unavailable: {error}",
                db_path.display()
            );
            error
        })?;
        let service = Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        };
        service.recover_in_flight().await?;
        Ok(service)
    }

    /// Open an in-memory queue (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem location, when the queue is file backed.
    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Append a mutation in `pending` state.
    pub async fn enqueue(&self, mutation: NewMutation) -> Result<QueuedMutation> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .enqueue(mutation)
            .await
    }

    /// Fetch a mutation by id.
    pub async fn get(&self, id: &MutationId) -> Result<Option<QueuedMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).get(id).await
    }

    /// List mutations with a status, oldest first.
    pub async fn list_by_status(&self, status: MutationStatus) -> Result<Vec<QueuedMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .list_by_status(status)
            .await
    }

    /// Snapshot of everything a drain pass has to look at, in enqueue order.
    pub async fn list_replayable(&self) -> Result<Vec<QueuedMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .list_replayable()
            .await
    }

    /// Mutations waiting on manual resolution.
    pub async fn list_held(&self) -> Result<Vec<QueuedMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).list_held().await
    }

    /// Set a status, optionally overwriting the attempt count.
    pub async fn update_status(
        &self,
        id: &MutationId,
        status: MutationStatus,
        attempt_count: Option<u32>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .update_status(id, status, attempt_count)
            .await
    }

    pub async fn mark_in_flight(&self, id: &MutationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .mark_in_flight(id)
            .await
    }

    pub async fn mark_failed(
        &self,
        id: &MutationId,
        hold: Option<HoldReason>,
        error: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .mark_failed(id, hold, error)
            .await
    }

    /// Clear a hold so the next pass retries the mutation.
    pub async fn release(&self, id: &MutationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).release(id).await
    }

    pub async fn count(&self, status: MutationStatus) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .count(status)
            .await
    }

    /// Count of `pending` + `failed` rows; the source of `SyncState::pending_count`.
    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .pending_count()
            .await
    }

    pub async fn remove(&self, id: &MutationId) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection()).remove(id).await
    }

    pub async fn purge_synced(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .purge_synced()
            .await
    }

    pub async fn recover_in_flight(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlMutationQueue::new(db.connection())
            .recover_in_flight()
            .await
    }
}
