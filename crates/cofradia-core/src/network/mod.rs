//! Connectivity and link quality observation.
//!
//! [`NetworkMonitor`] holds the latest [`NetworkSnapshot`], fed by platform
//! connectivity signals and a periodic latency probe. It never retries
//! anything; it only publishes changes to subscribers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::remote::RemoteError;

/// Round trip above which a connected link is treated as degraded.
pub const DEFAULT_GOOD_RTT: Duration = Duration::from_millis(3000);

/// Coarse link classification; informational only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

/// Last known state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub is_online: bool,
    /// Latest round-trip estimate, when one has been measured
    pub round_trip_millis: Option<u32>,
    pub connection_type: ConnectionType,
}

impl Default for NetworkSnapshot {
    fn default() -> Self {
        Self {
            is_online: true,
            round_trip_millis: None,
            connection_type: ConnectionType::Unknown,
        }
    }
}

impl NetworkSnapshot {
    pub const fn offline() -> Self {
        Self {
            is_online: false,
            round_trip_millis: None,
            connection_type: ConnectionType::Unknown,
        }
    }

    /// Good enough to attempt a live write.
    ///
    /// An unmeasured round trip does not degrade an online link.
    pub fn is_good(&self, threshold: Duration) -> bool {
        self.is_online
            && self
                .round_trip_millis
                .is_none_or(|rtt| u128::from(rtt) < threshold.as_millis())
    }
}

/// Measures the round trip to the backend
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe(&self) -> Result<Duration, RemoteError>;
}

/// Observable network state
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<NetworkSnapshot>>,
    good_rtt: Duration,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkSnapshot::default())
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            good_rtt: DEFAULT_GOOD_RTT,
        }
    }

    /// Override the "good network" round-trip threshold.
    #[must_use]
    pub const fn with_good_rtt(mut self, threshold: Duration) -> Self {
        self.good_rtt = threshold;
        self
    }

    pub const fn good_rtt(&self) -> Duration {
        self.good_rtt
    }

    /// Current snapshot.
    pub fn get_state(&self) -> NetworkSnapshot {
        *self.tx.borrow()
    }

    /// Receiver notified on every change; drop it to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<NetworkSnapshot> {
        self.tx.subscribe()
    }

    pub fn is_good(&self) -> bool {
        self.get_state().is_good(self.good_rtt)
    }

    /// Platform online/offline transition.
    pub fn set_online(&self, is_online: bool) {
        let changed = self.update(|snapshot| {
            snapshot.is_online = is_online;
            if !is_online {
                snapshot.round_trip_millis = None;
            }
        });
        if changed {
            if is_online {
                tracing::info!("Network: back online");
            } else {
                tracing::warn!("Network: offline");
            }
        }
    }

    pub fn set_connection_type(&self, connection_type: ConnectionType) {
        self.update(|snapshot| snapshot.connection_type = connection_type);
    }

    /// A successful round trip also proves the link is up.
    pub fn record_round_trip(&self, rtt: Duration) {
        let millis = u32::try_from(rtt.as_millis()).unwrap_or(u32::MAX);
        let was_online = self.get_state().is_online;
        self.update(|snapshot| {
            snapshot.is_online = true;
            snapshot.round_trip_millis = Some(millis);
        });
        if !was_online {
            tracing::info!("Network: back online (rtt {millis}ms)");
        }
    }

    fn update(&self, modify: impl FnOnce(&mut NetworkSnapshot)) -> bool {
        self.tx.send_if_modified(|snapshot| {
            let before = *snapshot;
            modify(snapshot);
            *snapshot != before
        })
    }

    /// Probe the link every `interval` until the task is aborted.
    pub fn spawn_probe(&self, probe: Arc<dyn LatencyProbe>, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match probe.probe().await {
                    Ok(rtt) => {
                        tracing::debug!("Network probe: {}ms", rtt.as_millis());
                        monitor.record_round_trip(rtt);
                    }
                    Err(error) => {
                        tracing::debug!("Network probe failed: {error}");
                        monitor.set_online(false);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn good_network_requires_online_and_fast_link() {
        let threshold = DEFAULT_GOOD_RTT;
        let mut snapshot = NetworkSnapshot::default();
        assert!(snapshot.is_good(threshold));

        snapshot.round_trip_millis = Some(2999);
        assert!(snapshot.is_good(threshold));

        snapshot.round_trip_millis = Some(3000);
        assert!(!snapshot.is_good(threshold));

        assert!(!NetworkSnapshot::offline().is_good(threshold));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_see_transitions_only_on_change() {
        let monitor = NetworkMonitor::default();
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_online);
        assert!(!monitor.is_good());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_round_trip_degrades_link() {
        let monitor = NetworkMonitor::default().with_good_rtt(Duration::from_millis(500));
        monitor.record_round_trip(Duration::from_millis(800));

        let snapshot = monitor.get_state();
        assert!(snapshot.is_online);
        assert_eq!(snapshot.round_trip_millis, Some(800));
        assert!(!monitor.is_good());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_receiver_unsubscribes() {
        let monitor = NetworkMonitor::default();
        let rx = monitor.subscribe();
        assert_eq!(monitor.tx.receiver_count(), 1);
        drop(rx);
        assert_eq!(monitor.tx.receiver_count(), 0);
    }

    struct FlakyProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LatencyProbe for FlakyProbe {
        async fn probe(&self) -> Result<Duration, RemoteError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RemoteError::Network("no route to host".to_string()))
            } else {
                Ok(Duration::from_millis(40))
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_marks_link_offline_then_online() {
        let monitor = NetworkMonitor::default();
        let mut rx = monitor.subscribe();
        let probe = Arc::new(FlakyProbe {
            calls: AtomicUsize::new(0),
        });

        let handle = monitor.spawn_probe(probe, Duration::from_millis(10));

        rx.wait_for(|snapshot| !snapshot.is_online).await.unwrap();
        let snapshot = *rx
            .wait_for(|snapshot| snapshot.round_trip_millis == Some(40))
            .await
            .unwrap();
        assert!(snapshot.is_online);

        handle.abort();
    }
}
