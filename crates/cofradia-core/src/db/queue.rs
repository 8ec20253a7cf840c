//! Durable mutation queue implementation

use crate::error::{Error, Result};
use crate::models::{HoldReason, MutationId, MutationStatus, NewMutation, QueuedMutation};
use crate::util::unix_millis_now;
use libsql::{Connection, Value};

const COLUMNS: &str = "seq, id, target_resource, record_id, operation_kind, payload, \
     base_version, status, hold, last_error, created_at, last_attempt_at, attempt_count";

/// Trait for mutation queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait MutationQueue {
    /// Append a mutation in `pending` state
    async fn enqueue(&self, mutation: NewMutation) -> Result<QueuedMutation>;

    /// Get a mutation by ID
    async fn get(&self, id: &MutationId) -> Result<Option<QueuedMutation>>;

    /// List mutations with the given status, oldest first
    async fn list_by_status(&self, status: MutationStatus) -> Result<Vec<QueuedMutation>>;

    /// List every `pending` or `failed` mutation in enqueue order
    async fn list_replayable(&self) -> Result<Vec<QueuedMutation>>;

    /// List `failed` mutations held back for manual resolution
    async fn list_held(&self) -> Result<Vec<QueuedMutation>>;

    /// Set a mutation's status, optionally overwriting its attempt count
    async fn update_status(
        &self,
        id: &MutationId,
        status: MutationStatus,
        attempt_count: Option<u32>,
    ) -> Result<()>;

    /// Mark a mutation as being applied right now
    async fn mark_in_flight(&self, id: &MutationId) -> Result<()>;

    /// Record a failed attempt; `hold` stops automatic retries
    async fn mark_failed(
        &self,
        id: &MutationId,
        hold: Option<HoldReason>,
        error: &str,
    ) -> Result<()>;

    /// Clear a hold and put the mutation back in `pending`
    async fn release(&self, id: &MutationId) -> Result<()>;

    /// Count mutations with the given status
    async fn count(&self, status: MutationStatus) -> Result<usize>;

    /// Count mutations still owed to the remote store (`pending` + `failed`)
    async fn pending_count(&self) -> Result<usize>;

    /// Remove a mutation; returns whether a row was deleted
    async fn remove(&self, id: &MutationId) -> Result<bool>;

    /// Remove every `synced` mutation
    async fn purge_synced(&self) -> Result<u64>;

    /// Return rows stranded `in_flight` by an interrupted pass to `pending`
    async fn recover_in_flight(&self) -> Result<u64>;
}

/// libSQL implementation of `MutationQueue`
pub struct LibSqlMutationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMutationQueue<'a> {
    /// Create a new queue over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_mutations(&self, sql: &str, params: Vec<Value>) -> Result<Vec<QueuedMutation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut mutations = Vec::new();
        while let Some(row) = rows.next().await? {
            mutations.push(parse_mutation(&row)?);
        }
        Ok(mutations)
    }

    async fn count_where(&self, predicate: &str, params: Vec<Value>) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM mutation_queue WHERE {predicate}");
        let mut rows = self.conn.query(&sql, params).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|_| Error::CorruptRow(format!("invalid row count {count}")))
    }

    fn expect_one(rows: u64, id: &MutationId) -> Result<()> {
        if rows == 0 {
            Err(Error::NotFound(format!("mutation {id}")))
        } else {
            Ok(())
        }
    }
}

impl MutationQueue for LibSqlMutationQueue<'_> {
    async fn enqueue(&self, mutation: NewMutation) -> Result<QueuedMutation> {
        let id = MutationId::new();
        let created_at = unix_millis_now();
        let payload = serde_json::to_string(&mutation.payload)?;

        self.conn
            .execute(
                "INSERT INTO mutation_queue (
                    id, target_resource, record_id, operation_kind, payload,
                    base_version, status, created_at, attempt_count
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)",
                vec![
                    Value::Text(id.as_str()),
                    Value::Text(mutation.target_resource.clone()),
                    optional_text(mutation.record_id.clone()),
                    Value::Text(mutation.operation_kind.as_str().to_string()),
                    Value::Text(payload),
                    optional_text(mutation.base_version.clone()),
                    Value::Text(MutationStatus::Pending.as_str().to_string()),
                    Value::Integer(created_at),
                ],
            )
            .await?;
        let seq = self.conn.last_insert_rowid();

        tracing::debug!(
            "Queued {} on {} as {id} (seq {seq})",
            mutation.operation_kind,
            mutation.target_resource
        );

        Ok(QueuedMutation {
            id,
            seq,
            target_resource: mutation.target_resource,
            record_id: mutation.record_id,
            operation_kind: mutation.operation_kind,
            payload: mutation.payload,
            base_version: mutation.base_version,
            status: MutationStatus::Pending,
            hold: None,
            last_error: None,
            created_at,
            last_attempt_at: None,
            attempt_count: 0,
        })
    }

    async fn get(&self, id: &MutationId) -> Result<Option<QueuedMutation>> {
        let sql = format!("SELECT {COLUMNS} FROM mutation_queue WHERE id = ?");
        let mut found = self
            .query_mutations(&sql, vec![Value::Text(id.as_str())])
            .await?;
        Ok(found.pop())
    }

    async fn list_by_status(&self, status: MutationStatus) -> Result<Vec<QueuedMutation>> {
        let sql = format!("SELECT {COLUMNS} FROM mutation_queue WHERE status = ? ORDER BY seq");
        self.query_mutations(&sql, vec![Value::Text(status.as_str().to_string())])
            .await
    }

    async fn list_replayable(&self) -> Result<Vec<QueuedMutation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM mutation_queue
             WHERE status IN ('pending', 'failed')
             ORDER BY seq"
        );
        self.query_mutations(&sql, Vec::new()).await
    }

    async fn list_held(&self) -> Result<Vec<QueuedMutation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM mutation_queue
             WHERE status = 'failed' AND hold IS NOT NULL
             ORDER BY seq"
        );
        self.query_mutations(&sql, Vec::new()).await
    }

    async fn update_status(
        &self,
        id: &MutationId,
        status: MutationStatus,
        attempt_count: Option<u32>,
    ) -> Result<()> {
        let rows = if let Some(attempt_count) = attempt_count {
            self.conn
                .execute(
                    "UPDATE mutation_queue SET status = ?, attempt_count = ? WHERE id = ?",
                    vec![
                        Value::Text(status.as_str().to_string()),
                        Value::Integer(i64::from(attempt_count)),
                        Value::Text(id.as_str()),
                    ],
                )
                .await?
        } else {
            self.conn
                .execute(
                    "UPDATE mutation_queue SET status = ? WHERE id = ?",
                    vec![
                        Value::Text(status.as_str().to_string()),
                        Value::Text(id.as_str()),
                    ],
                )
                .await?
        };
        Self::expect_one(rows, id)
    }

    async fn mark_in_flight(&self, id: &MutationId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE mutation_queue SET status = 'in_flight', last_attempt_at = ?
                 WHERE id = ? AND status IN ('pending', 'failed')",
                vec![Value::Integer(unix_millis_now()), Value::Text(id.as_str())],
            )
            .await?;
        Self::expect_one(rows, id)
    }

    async fn mark_failed(
        &self,
        id: &MutationId,
        hold: Option<HoldReason>,
        error: &str,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE mutation_queue
                 SET status = 'failed', hold = ?, last_error = ?,
                     attempt_count = attempt_count + 1
                 WHERE id = ?",
                vec![
                    optional_text(hold.map(|hold| hold.as_str().to_string())),
                    Value::Text(error.to_string()),
                    Value::Text(id.as_str()),
                ],
            )
            .await?;
        Self::expect_one(rows, id)
    }

    async fn release(&self, id: &MutationId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE mutation_queue SET status = 'pending', hold = NULL, last_error = NULL
                 WHERE id = ? AND status = 'failed'",
                vec![Value::Text(id.as_str())],
            )
            .await?;
        Self::expect_one(rows, id)
    }

    async fn count(&self, status: MutationStatus) -> Result<usize> {
        self.count_where("status = ?", vec![Value::Text(status.as_str().to_string())])
            .await
    }

    async fn pending_count(&self) -> Result<usize> {
        self.count_where("status IN ('pending', 'failed')", Vec::new())
            .await
    }

    async fn remove(&self, id: &MutationId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM mutation_queue WHERE id = ?",
                vec![Value::Text(id.as_str())],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn purge_synced(&self) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM mutation_queue WHERE status = 'synced'", ())
            .await?;
        Ok(rows)
    }

    async fn recover_in_flight(&self) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE mutation_queue SET status = 'pending' WHERE status = 'in_flight'",
                (),
            )
            .await?;
        if rows > 0 {
            tracing::warn!("Recovered {rows} mutation(s) interrupted mid-sync");
        }
        Ok(rows)
    }
}

fn optional_text(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}

fn text_column(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::CorruptRow(format!(
            "expected text in column {idx}, found {other:?}"
        ))),
    }
}

fn integer_column(row: &libsql::Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::CorruptRow(format!(
            "expected integer in column {idx}, found {other:?}"
        ))),
    }
}

/// Parse a queued mutation from a row selected with [`COLUMNS`]
fn parse_mutation(row: &libsql::Row) -> Result<QueuedMutation> {
    let id: String = row.get(1)?;
    let payload: String = row.get(5)?;
    let status: String = row.get(7)?;
    let attempt_count: i64 = row.get(12)?;

    Ok(QueuedMutation {
        id: id
            .parse()
            .map_err(|_| Error::CorruptRow(format!("invalid mutation id '{id}'")))?,
        seq: row.get(0)?,
        target_resource: row.get(2)?,
        record_id: text_column(row, 3)?,
        operation_kind: row.get::<String>(4)?.parse()?,
        payload: serde_json::from_str(&payload)?,
        base_version: text_column(row, 6)?,
        status: status.parse()?,
        hold: text_column(row, 8)?
            .map(|hold| hold.parse())
            .transpose()?,
        last_error: text_column(row, 9)?,
        created_at: row.get(10)?,
        last_attempt_at: integer_column(row, 11)?,
        attempt_count: u32::try_from(attempt_count).unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::OperationKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn create_member(name: &str) -> NewMutation {
        NewMutation::new(
            "members",
            OperationKind::Create,
            json!({ "id": name.to_lowercase(), "name": name }),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_and_get() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let queued = queue.enqueue(create_member("Ana")).await.unwrap();
        assert_eq!(queued.status, MutationStatus::Pending);
        assert_eq!(queued.record_id.as_deref(), Some("ana"));

        let fetched = queue.get(&queued.id).await.unwrap().unwrap();
        assert_eq!(fetched, queued);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replayable_is_fifo() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let first = queue.enqueue(create_member("Ana")).await.unwrap();
        let second = queue.enqueue(create_member("Luis")).await.unwrap();
        let third = queue.enqueue(create_member("Rocio")).await.unwrap();
        assert!(first.seq < second.seq && second.seq < third.seq);

        let ids: Vec<_> = queue
            .list_replayable()
            .await
            .unwrap()
            .into_iter()
            .map(|mutation| mutation.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_count_covers_pending_and_failed() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let a = queue.enqueue(create_member("Ana")).await.unwrap();
        let b = queue.enqueue(create_member("Luis")).await.unwrap();
        let c = queue.enqueue(create_member("Rocio")).await.unwrap();

        queue.mark_in_flight(&a.id).await.unwrap();
        queue.update_status(&a.id, MutationStatus::Synced, None).await.unwrap();
        queue.mark_in_flight(&b.id).await.unwrap();
        queue.mark_failed(&b.id, None, "timed out").await.unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 2);
        assert_eq!(queue.count(MutationStatus::Synced).await.unwrap(), 1);
        assert_eq!(queue.count(MutationStatus::Failed).await.unwrap(), 1);
        assert_eq!(queue.count(MutationStatus::Pending).await.unwrap(), 1);

        let failed = queue.get(&b.id).await.unwrap().unwrap();
        assert_eq!(failed.attempt_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("timed out"));
        assert!(failed.last_attempt_at.is_some());

        let replayable = queue.list_replayable().await.unwrap();
        assert_eq!(replayable.len(), 2);
        assert!(replayable.iter().all(|mutation| mutation.id != a.id));
        assert!(replayable.iter().any(|mutation| mutation.id == c.id));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_held_mutation_release() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let queued = queue.enqueue(create_member("Ana")).await.unwrap();
        queue
            .mark_failed(&queued.id, Some(HoldReason::Conflict), "record deleted remotely")
            .await
            .unwrap();

        let held = queue.list_held().await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].hold, Some(HoldReason::Conflict));

        queue.release(&queued.id).await.unwrap();
        assert!(queue.list_held().await.unwrap().is_empty());
        let released = queue.get(&queued.id).await.unwrap().unwrap();
        assert_eq!(released.status, MutationStatus::Pending);
        assert_eq!(released.last_error, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_status_sets_attempt_count() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let queued = queue.enqueue(create_member("Ana")).await.unwrap();
        queue
            .update_status(&queued.id, MutationStatus::Failed, Some(4))
            .await
            .unwrap();

        let updated = queue.get(&queued.id).await.unwrap().unwrap();
        assert_eq!(updated.status, MutationStatus::Failed);
        assert_eq!(updated.attempt_count, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_missing_is_not_found() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let missing = MutationId::new();
        let result = queue
            .update_status(&missing, MutationStatus::Synced, None)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!queue.remove(&missing).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_undecodable_row_is_reported_as_corrupt() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        db.connection()
            .execute(
                "INSERT INTO mutation_queue (
                    id, target_resource, record_id, operation_kind, payload,
                    base_version, status, created_at, attempt_count
                ) VALUES ('not-a-uuid', 'members', NULL, 'create', '{}', NULL, 'pending', 0, 0)",
                (),
            )
            .await
            .unwrap();

        let result = queue.list_replayable().await;
        assert!(matches!(result, Err(Error::CorruptRow(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recover_and_purge() {
        let db = setup().await;
        let queue = LibSqlMutationQueue::new(db.connection());

        let stranded = queue.enqueue(create_member("Ana")).await.unwrap();
        let done = queue.enqueue(create_member("Luis")).await.unwrap();
        queue.mark_in_flight(&stranded.id).await.unwrap();
        queue
            .update_status(&done.id, MutationStatus::Synced, None)
            .await
            .unwrap();

        assert_eq!(queue.recover_in_flight().await.unwrap(), 1);
        assert_eq!(queue.purge_synced().await.unwrap(), 1);

        let remaining = queue.list_replayable().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, stranded.id);
        assert_eq!(remaining[0].status, MutationStatus::Pending);
    }
}
