//! Fire-and-forget user notifications (toasts, log lines).

use crate::models::{Conflict, MutationId};

/// Something the user should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A live write succeeded; caches keyed by `resource` are stale
    Applied {
        resource: String,
        message: Option<String>,
    },
    /// A write was saved locally and will sync later
    QueuedOffline {
        resource: String,
        mutation_id: MutationId,
    },
    SyncCompleted {
        synced: usize,
    },
    SyncFailed {
        failed: usize,
        message: String,
    },
    ConflictDetected(Conflict),
}

/// Receiver of [`Notification`]s.
///
/// Implementations must not panic and must not block; nothing they do can
/// change the outcome of a write or a drain pass.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Routes notifications to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Applied { resource, message } => {
                if let Some(message) = message {
                    tracing::info!("{message}");
                }
                tracing::debug!("Saved {resource}; invalidating cached reads");
            }
            Notification::QueuedOffline {
                resource,
                mutation_id,
            } => {
                tracing::info!(
                    "Saved {resource} change locally ({mutation_id}); it will sync when the connection returns"
                );
            }
            Notification::SyncCompleted { synced } => {
                tracing::info!("Sync completed: {synced} change(s) uploaded");
            }
            Notification::SyncFailed { failed, message } => {
                tracing::warn!("Sync incomplete: {failed} change(s) still pending ({message})");
            }
            Notification::ConflictDetected(conflict) => {
                tracing::warn!(
                    "Sync conflict on {} {}: {}",
                    conflict.table,
                    conflict.record_id.as_deref().unwrap_or("(new record)"),
                    conflict.message
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{Notification, Notifier};

    /// Collects notifications for assertions
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        seen: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn seen(&self) -> Vec<Notification> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: Notification) {
            self.seen.lock().unwrap().push(notification);
        }
    }
}
