//! Per-operation decision point: write live, or defer to the durable queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::models::{MutationId, NewMutation};
use crate::network::NetworkMonitor;
use crate::notify::{Notification, Notifier};
use crate::remote::{with_timeout, RemoteError, RemoteStore};
use crate::services::QueueService;
use crate::state::SyncStateStore;

/// Default limit for a single live write.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a write that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The remote store confirmed the write
    Applied(T),
    /// The write was saved locally and will be replayed by the sync engine
    Queued {
        mutation_id: MutationId,
        payload: Value,
    },
}

impl<T> Outcome<T> {
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Failures the caller has to handle
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Domain rejection or conflict from the remote store; nothing was queued
    #[error(transparent)]
    Rejected(RemoteError),
    /// The local queue is unavailable, so the write could not be deferred
    #[error("local mutation queue unavailable: {0}")]
    Storage(#[source] crate::Error),
}

/// Decides, for each write, between the live path and the offline queue
#[derive(Clone)]
pub struct MutationGateway {
    queue: QueueService,
    network: NetworkMonitor,
    state: SyncStateStore,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    announce_success: bool,
}

impl MutationGateway {
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
            announce_success: false,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Emit a success message for live writes, not just the invalidation.
    #[must_use]
    pub const fn with_success_messages(mut self, announce: bool) -> Self {
        self.announce_success = announce;
        self
    }

    /// Run `operation` with the request payload, or queue the request.
    ///
    /// The live path is taken only on a good network. A network-class failure
    /// there falls through to the queue; any other failure is returned and
    /// nothing is queued.
    pub async fn execute<T, F, Fut>(
        &self,
        request: NewMutation,
        operation: F,
    ) -> Result<Outcome<T>, GatewayError>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let network = self.network.get_state();
        self.state.set_network(network);

        if network.is_good(self.network.good_rtt()) {
            match with_timeout(self.timeout, operation(request.payload.clone())).await {
                Ok(value) => {
                    self.notifier.notify(Notification::Applied {
                        resource: request.target_resource.clone(),
                        message: self
                            .announce_success
                            .then(|| format!("Saved {}", request.target_resource)),
                    });
                    return Ok(Outcome::Applied(value));
                }
                Err(error) if error.is_retryable() => {
                    tracing::warn!(
                        "Live {} on {} failed ({error}); queueing for later sync",
                        request.operation_kind,
                        request.target_resource
                    );
                }
                Err(error) => {
                    tracing::debug!(
                        "Live {} on {} rejected: {error}",
                        request.operation_kind,
                        request.target_resource
                    );
                    return Err(GatewayError::Rejected(error));
                }
            }
        } else {
            tracing::debug!(
                "Network degraded (online: {}, rtt: {:?}); queueing {} on {}",
                network.is_online,
                network.round_trip_millis,
                request.operation_kind,
                request.target_resource
            );
        }

        self.defer(request).await
    }

    /// [`Self::execute`] with the remote store's own apply as the live call.
    pub async fn submit(&self, request: NewMutation) -> Result<Outcome<Value>, GatewayError> {
        let remote = Arc::clone(&self.remote);
        let live = request.clone();
        self.execute(request, move |_| async move { remote.apply(&live).await })
            .await
    }

    async fn defer<T>(&self, request: NewMutation) -> Result<Outcome<T>, GatewayError> {
        let queued = self.queue.enqueue(request).await.map_err(|error| {
            tracing::error!("Could not queue mutation locally: {error}");
            GatewayError::Storage(error)
        })?;
        let pending = self
            .queue
            .pending_count()
            .await
            .map_err(GatewayError::Storage)?;
        self.state.set_pending_count(pending);

        self.notifier.notify(Notification::QueuedOffline {
            resource: queued.target_resource.clone(),
            mutation_id: queued.id,
        });

        Ok(Outcome::Queued {
            mutation_id: queued.id,
            payload: queued.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MutationStatus, OperationKind};
    use crate::network::ConnectionType;
    use crate::notify::testing::RecordingNotifier;
    use crate::remote::MemoryRemoteStore;
    use serde_json::json;

    struct Harness {
        gateway: MutationGateway,
        queue: QueueService,
        network: NetworkMonitor,
        state: SyncStateStore,
        remote: Arc<MemoryRemoteStore>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn harness() -> Harness {
        let queue = QueueService::open_in_memory().await.unwrap();
        let network = NetworkMonitor::default();
        let state = SyncStateStore::new();
        let remote = Arc::new(MemoryRemoteStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = MutationGateway::new(
            queue.clone(),
            network.clone(),
            state.clone(),
            remote.clone(),
            notifier.clone(),
        )
        .with_timeout(Duration::from_millis(200));
        Harness {
            gateway,
            queue,
            network,
            state,
            remote,
            notifier,
        }
    }

    fn new_member(id: &str) -> NewMutation {
        NewMutation::new(
            "members",
            OperationKind::Create,
            json!({ "id": id, "name": "Hermano" }),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn good_network_applies_live() {
        let h = harness().await;

        let outcome = h.gateway.submit(new_member("m-1")).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied(ref value) if value["id"] == "m-1"));
        assert_eq!(h.queue.pending_count().await.unwrap(), 0);
        assert_eq!(h.remote.record_count("members"), 1);
        assert!(matches!(
            h.notifier.seen().as_slice(),
            [Notification::Applied { .. }]
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_writes_are_queued_optimistically() {
        let h = harness().await;
        h.network.set_online(false);

        let outcome = h.gateway.submit(new_member("m-1")).await.unwrap();
        let Outcome::Queued {
            mutation_id,
            payload,
        } = outcome
        else {
            panic!("expected a queued outcome");
        };
        assert_eq!(payload["id"], "m-1");

        let queued = h.queue.get(&mutation_id).await.unwrap().unwrap();
        assert_eq!(queued.status, MutationStatus::Pending);
        assert_eq!(h.remote.call_count(), 0);

        let state = h.state.snapshot();
        assert_eq!(state.pending_count, 1);
        assert!(!state.is_online);
        assert!(matches!(
            h.notifier.seen().as_slice(),
            [Notification::QueuedOffline { .. }]
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_count_matches_distinct_offline_writes() {
        let h = harness().await;
        h.network.set_online(false);

        for index in 0..7 {
            let outcome = h
                .gateway
                .submit(new_member(&format!("m-{index}")))
                .await
                .unwrap();
            assert!(outcome.is_queued());
        }

        assert_eq!(h.state.snapshot().pending_count, 7);
        assert_eq!(h.queue.pending_count().await.unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_link_is_treated_as_offline() {
        let h = harness().await;
        h.network.record_round_trip(Duration::from_millis(4500));

        let outcome = h.gateway.submit(new_member("m-1")).await.unwrap();
        assert!(outcome.is_queued());
        assert_eq!(h.remote.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn network_failure_while_online_falls_through_to_queue() {
        let h = harness().await;
        h.remote
            .fail_next(RemoteError::Network("connection reset by peer".to_string()));

        let outcome = h.gateway.submit(new_member("m-1")).await.unwrap();
        assert!(outcome.is_queued());
        assert_eq!(h.remote.call_count(), 1);
        assert_eq!(h.state.snapshot().pending_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_falls_through_to_queue() {
        let h = harness().await;

        let outcome = h
            .gateway
            .execute(new_member("m-1"), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, RemoteError>(())
            })
            .await
            .unwrap();
        assert!(outcome.is_queued());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn domain_error_is_surfaced_and_not_queued() {
        let h = harness().await;

        let result = h
            .gateway
            .execute(new_member("m-1"), |_| async {
                Err::<Value, _>(RemoteError::Unclassified("duplicate entry".to_string()))
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Rejected(_))));
        assert_eq!(h.queue.pending_count().await.unwrap(), 0);
        assert_eq!(h.state.snapshot().pending_count, 0);
        assert!(h.notifier.seen().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn structured_rejection_is_surfaced() {
        let h = harness().await;
        h.remote
            .insert_record("members", "m-1", json!({ "id": "m-1", "name": "Otro" }));

        let result = h.gateway.submit(new_member("m-1")).await;
        assert!(matches!(
            result,
            Err(GatewayError::Rejected(RemoteError::Rejected { .. }))
        ));
        assert_eq!(h.queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operation_receives_request_payload() {
        let h = harness().await;

        let outcome = h
            .gateway
            .execute(new_member("m-9"), |variables| async move {
                Ok::<_, RemoteError>(variables["id"].as_str().map(str::to_string))
            })
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Applied(Some("m-9".to_string())));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_messages_are_opt_in() {
        let h = harness().await;
        let gateway = h.gateway.clone().with_success_messages(true);

        gateway.submit(new_member("m-1")).await.unwrap();
        assert_eq!(
            h.notifier.seen(),
            vec![Notification::Applied {
                resource: "members".to_string(),
                message: Some("Saved members".to_string()),
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn network_state_is_mirrored_into_sync_state() {
        let h = harness().await;
        h.network.set_online(false);
        h.network.set_connection_type(ConnectionType::Cellular);

        h.gateway.submit(new_member("m-1")).await.unwrap();
        let state = h.state.snapshot();
        assert!(!state.is_online);
        assert_eq!(state.connection_type, ConnectionType::Cellular);
    }
}
