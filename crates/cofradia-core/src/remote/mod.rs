//! Remote store contract and error taxonomy.
//!
//! The remote store is the hosted relational backend. Mutations reach it as
//! create/update/delete calls keyed by resource name and record id, and every
//! failure comes back as a [`RemoteError`] whose [`ErrorClass`] decides what
//! the gateway and the sync engine do next.

mod memory;
mod postgrest;

pub use memory::{AppliedOp, MemoryRemoteStore};
pub use postgrest::{HttpProbe, PostgrestStore};

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{NewMutation, OperationKind};

/// How a remote failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient connectivity failure; queue or retry
    Network,
    /// Deterministic business-rule rejection; surface, never replay blindly
    Domain,
    /// Remote state diverged from what the mutation assumed
    Conflict,
}

/// Failure reported by a [`RemoteStore`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote state changed: {0}")]
    Conflict(String),
    #[error("rejected by remote store: {message}")]
    Rejected {
        /// Backend error code (e.g. a PostgreSQL SQLSTATE), when known
        code: Option<String>,
        message: String,
    },
    /// A failure with no structured kind; classified from its message
    #[error("{0}")]
    Unclassified(String),
}

impl RemoteError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            code: None,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) | Self::Timeout(_) => ErrorClass::Network,
            Self::Conflict(_) => ErrorClass::Conflict,
            Self::Rejected { .. } => ErrorClass::Domain,
            Self::Unclassified(message) => classify_message(message),
        }
    }

    /// Whether a later attempt could succeed without anyone intervening.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Network
    }
}

const NETWORK_MARKERS: [&str; 7] = [
    "network",
    "timeout",
    "timed out",
    "fetch",
    "connection",
    "offline",
    "unreachable",
];

/// Message heuristic for errors that carry no structured kind.
///
/// Only used for [`RemoteError::Unclassified`]; anything that does not look
/// like a connectivity problem is treated as a domain rejection.
pub fn classify_message(message: &str) -> ErrorClass {
    let message = message.to_ascii_lowercase();
    if NETWORK_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        ErrorClass::Network
    } else {
        ErrorClass::Domain
    }
}

/// Run a remote call under `limit`; expiry is a network-class failure.
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(RemoteError::Timeout(limit)))
}

/// Create/update/delete access to the hosted backend
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a record; returns the stored representation
    async fn create(&self, resource: &str, payload: &Value) -> Result<Value, RemoteError>;

    /// Patch a record. With `base_version`, the update only applies if the
    /// remote record is still at that version.
    async fn update(
        &self,
        resource: &str,
        record_id: &str,
        payload: &Value,
        base_version: Option<&str>,
    ) -> Result<Value, RemoteError>;

    /// Delete a record. Deleting a record that is already gone succeeds.
    async fn delete(
        &self,
        resource: &str,
        record_id: &str,
        base_version: Option<&str>,
    ) -> Result<(), RemoteError>;

    /// Dispatch a mutation by its operation kind
    async fn apply(&self, mutation: &NewMutation) -> Result<Value, RemoteError> {
        let resource = mutation.target_resource.as_str();
        let base_version = mutation.base_version.as_deref();

        match mutation.operation_kind {
            OperationKind::Create => self.create(resource, &mutation.payload).await,
            OperationKind::Update => {
                let record_id = required_record_id(mutation)?;
                self.update(resource, record_id, &mutation.payload, base_version)
                    .await
            }
            OperationKind::Delete => {
                let record_id = required_record_id(mutation)?;
                self.delete(resource, record_id, base_version).await?;
                Ok(Value::Null)
            }
        }
    }
}

fn required_record_id(mutation: &NewMutation) -> Result<&str, RemoteError> {
    mutation.record_id.as_deref().ok_or_else(|| {
        RemoteError::rejected(format!(
            "{} on {} needs a record id",
            mutation.operation_kind, mutation.target_resource
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_errors_classify_without_message_inspection() {
        assert_eq!(
            RemoteError::Network("dns".into()).class(),
            ErrorClass::Network
        );
        assert_eq!(
            RemoteError::Timeout(Duration::from_secs(10)).class(),
            ErrorClass::Network
        );
        assert_eq!(
            RemoteError::Conflict("gone".into()).class(),
            ErrorClass::Conflict
        );
        // A rejection mentioning "connection" is still a rejection.
        assert_eq!(
            RemoteError::rejected("connection limit per member exceeded").class(),
            ErrorClass::Domain
        );
    }

    #[test]
    fn unclassified_errors_fall_back_to_message_heuristics() {
        assert_eq!(
            RemoteError::Unclassified("TypeError: Failed to fetch".into()).class(),
            ErrorClass::Network
        );
        assert_eq!(
            RemoteError::Unclassified("Request Timed Out".into()).class(),
            ErrorClass::Network
        );
        assert_eq!(
            RemoteError::Unclassified("duplicate entry".into()).class(),
            ErrorClass::Domain
        );
    }

    #[test]
    fn only_network_class_is_retryable() {
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(!RemoteError::Conflict("stale".into()).is_retryable());
        assert!(!RemoteError::rejected("permission denied").is_retryable());
    }
}
