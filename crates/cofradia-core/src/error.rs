//! Local failures of the sync core

use thiserror::Error;

/// Result type alias using cofradia-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the local side of the sync core.
///
/// These are storage-level faults: the durable queue itself is unavailable or
/// holds data it cannot decode. They are never network or remote-store
/// failures, which travel as [`crate::remote::RemoteError`].
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL could not open the queue or run a statement
    #[error("Queue storage error: {0}")]
    Storage(#[from] libsql::Error),

    /// A stored row holds a value this build cannot decode
    #[error("Corrupt queue row: {0}")]
    CorruptRow(String),

    #[error("Queue directory unavailable: {0}")]
    Io(#[from] std::io::Error),

    /// No queued mutation or conflict with that id
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Mutation payload could not be encoded or decoded
    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),
}
