//! In-process remote store.
//!
//! Behaves like the hosted backend for the parts the sync core depends on:
//! record versions, stale-state detection, uniqueness, and connectivity loss.
//! Tests script it to reproduce remote deletes, rejections, and slow links.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteError, RemoteStore};
use crate::models::OperationKind;

/// One call the store accepted, in the order it was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOp {
    pub kind: OperationKind,
    pub resource: String,
    pub record_id: String,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, BTreeMap<String, StoredRecord>>,
    offline: bool,
    latency: Option<Duration>,
    scripted_failures: VecDeque<RemoteError>,
    applied: Vec<AppliedOp>,
    calls: usize,
    next_id: u64,
}

/// Remote store kept in memory
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate losing (or regaining) connectivity to the backend.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Make the next call fail with `error`, regardless of its content.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().scripted_failures.push_back(error);
    }

    /// Seed a record as if another client had written it; returns its version.
    pub fn insert_record(&self, resource: &str, record_id: &str, value: Value) -> String {
        let mut state = self.lock();
        let table = state.tables.entry(resource.to_string()).or_default();
        let version = table.get(record_id).map_or(1, |record| record.version + 1);
        table.insert(record_id.to_string(), StoredRecord { value, version });
        version.to_string()
    }

    /// Delete a record as if another client had removed it.
    pub fn remove_record(&self, resource: &str, record_id: &str) -> bool {
        self.lock()
            .tables
            .get_mut(resource)
            .is_some_and(|table| table.remove(record_id).is_some())
    }

    pub fn record(&self, resource: &str, record_id: &str) -> Option<Value> {
        self.lock()
            .tables
            .get(resource)
            .and_then(|table| table.get(record_id))
            .map(|record| record.value.clone())
    }

    pub fn record_version(&self, resource: &str, record_id: &str) -> Option<String> {
        self.lock()
            .tables
            .get(resource)
            .and_then(|table| table.get(record_id))
            .map(|record| record.version.to_string())
    }

    pub fn record_count(&self, resource: &str) -> usize {
        self.lock().tables.get(resource).map_or(0, BTreeMap::len)
    }

    /// Every accepted write, oldest first.
    pub fn applied(&self) -> Vec<AppliedOp> {
        self.lock().applied.clone()
    }

    /// Total calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    /// Count the call and return its scripted outcome, if any.
    async fn begin_call(&self) -> Result<(), RemoteError> {
        let latency = {
            let mut state = self.lock();
            state.calls += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Network("backend unreachable".to_string()));
        }
        match state.scripted_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn check_version(
    record: &StoredRecord,
    record_id: &str,
    base_version: Option<&str>,
) -> Result<(), RemoteError> {
    match base_version {
        Some(base) if base != record.version.to_string() => Err(RemoteError::Conflict(format!(
            "record {record_id} was modified remotely (version {} != {base})",
            record.version
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(&self, resource: &str, payload: &Value) -> Result<Value, RemoteError> {
        self.begin_call().await?;

        let mut state = self.lock();
        let record_id = match payload.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                state.next_id += 1;
                format!("mem-{}", state.next_id)
            }
        };

        let table = state.tables.entry(resource.to_string()).or_default();
        if let Some(existing) = table.get(&record_id) {
            // Replaying the same create is harmless; a different one is a clash.
            if existing.value == *payload {
                return Ok(existing.value.clone());
            }
            return Err(RemoteError::Rejected {
                code: Some("23505".to_string()),
                message: format!("duplicate key value violates unique constraint ({record_id})"),
            });
        }

        let mut value = payload.clone();
        if let Value::Object(fields) = &mut value {
            fields
                .entry("id")
                .or_insert_with(|| Value::String(record_id.clone()));
        }
        table.insert(
            record_id.clone(),
            StoredRecord {
                value: value.clone(),
                version: 1,
            },
        );
        state.applied.push(AppliedOp {
            kind: OperationKind::Create,
            resource: resource.to_string(),
            record_id,
        });
        Ok(value)
    }

    async fn update(
        &self,
        resource: &str,
        record_id: &str,
        payload: &Value,
        base_version: Option<&str>,
    ) -> Result<Value, RemoteError> {
        self.begin_call().await?;

        let mut state = self.lock();
        let record = state
            .tables
            .get_mut(resource)
            .and_then(|table| table.get_mut(record_id))
            .ok_or_else(|| {
                RemoteError::Conflict(format!("record {record_id} no longer exists in {resource}"))
            })?;
        check_version(record, record_id, base_version)?;

        match (&mut record.value, payload) {
            (Value::Object(current), Value::Object(changes)) => {
                for (key, value) in changes {
                    current.insert(key.clone(), value.clone());
                }
            }
            (current, replacement) => *current = replacement.clone(),
        }
        record.version += 1;
        let value = record.value.clone();

        state.applied.push(AppliedOp {
            kind: OperationKind::Update,
            resource: resource.to_string(),
            record_id: record_id.to_string(),
        });
        Ok(value)
    }

    async fn delete(
        &self,
        resource: &str,
        record_id: &str,
        base_version: Option<&str>,
    ) -> Result<(), RemoteError> {
        self.begin_call().await?;

        let mut state = self.lock();
        if let Some(table) = state.tables.get_mut(resource) {
            if let Some(record) = table.get(record_id) {
                check_version(record, record_id, base_version)?;
                table.remove(record_id);
            }
        }

        state.applied.push(AppliedOp {
            kind: OperationKind::Delete,
            resource: resource.to_string(),
            record_id: record_id.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMutation;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_removed_record_is_a_conflict() {
        let store = MemoryRemoteStore::new();
        store.insert_record("members", "m-1", json!({"id": "m-1", "name": "Ana"}));
        assert!(store.remove_record("members", "m-1"));

        let error = store
            .update("members", "m-1", &json!({"name": "Ana Maria"}), None)
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::Conflict(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_base_version_is_a_conflict() {
        let store = MemoryRemoteStore::new();
        let v1 = store.insert_record("members", "m-1", json!({"id": "m-1"}));
        store.insert_record("members", "m-1", json!({"id": "m-1", "phone": "600"}));

        let error = store
            .update("members", "m-1", &json!({"phone": "700"}), Some(&v1))
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::Conflict(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replayed_create_is_idempotent_but_clashes_are_rejected() {
        let store = MemoryRemoteStore::new();
        let payload = json!({"id": "m-1", "name": "Ana"});

        store.create("members", &payload).await.unwrap();
        store.create("members", &payload).await.unwrap();
        assert_eq!(store.record_count("members"), 1);

        let error = store
            .create("members", &json!({"id": "m-1", "name": "Luis"}))
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::Rejected { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_store_fails_with_network_errors() {
        let store = MemoryRemoteStore::new();
        store.set_offline(true);

        let mutation = NewMutation::new("members", OperationKind::Create, json!({"id": "m-1"}));
        let error = store.apply(&mutation).await.unwrap_err();
        assert!(error.is_retryable());
        assert_eq!(store.call_count(), 1);
        assert!(store.applied().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_dispatches_by_kind() {
        let store = MemoryRemoteStore::new();

        let create = NewMutation::new(
            "members",
            OperationKind::Create,
            json!({"id": "m-1", "name": "Ana"}),
        );
        let update = NewMutation::new(
            "members",
            OperationKind::Update,
            json!({"id": "m-1", "name": "Ana Maria"}),
        );
        let delete = NewMutation::new("members", OperationKind::Delete, json!({"id": "m-1"}));

        store.apply(&create).await.unwrap();
        let updated = store.apply(&update).await.unwrap();
        assert_eq!(updated["name"], "Ana Maria");
        store.apply(&delete).await.unwrap();

        let kinds: Vec<_> = store.applied().into_iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Create,
                OperationKind::Update,
                OperationKind::Delete
            ]
        );
        assert_eq!(store.record("members", "m-1"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_without_record_id_is_rejected() {
        let store = MemoryRemoteStore::new();
        let mutation = NewMutation::new("members", OperationKind::Update, json!({"name": "x"}));

        let error = store.apply(&mutation).await.unwrap_err();
        assert!(matches!(error, RemoteError::Rejected { .. }));
        assert_eq!(store.call_count(), 0);
    }
}
