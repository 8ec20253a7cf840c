//! cofradia-core - Offline-first sync core for the Cofradía console
//!
//! Writes go through the [`MutationGateway`], which applies them live on a
//! good network and otherwise persists them in a durable local queue. The
//! [`SyncEngine`] replays that queue in order once connectivity returns, and
//! publishes its progress through the [`SyncStateStore`].

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod network;
pub mod notify;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{ConfigError, RemoteSettings, SyncSettings};
pub use error::{Error, Result};
pub use gateway::{GatewayError, MutationGateway, Outcome};
pub use models::{
    Conflict, ConflictId, HoldReason, MutationId, MutationStatus, NewMutation, OperationKind,
    QueuedMutation,
};
pub use network::{ConnectionType, NetworkMonitor, NetworkSnapshot};
pub use notify::{Notification, Notifier, TracingNotifier};
pub use remote::{ErrorClass, RemoteError, RemoteStore};
pub use services::QueueService;
pub use state::{SyncProgress, SyncState, SyncStateStore};
pub use sync::{PassOutcome, PassReport, Resolution, SyncEngine, SyncWorker};
