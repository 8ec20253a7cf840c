use std::io;

use cofradia_core::{ConfigError, GatewayError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] cofradia_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Payload is not valid JSON: {0}")]
    InvalidPayload(#[source] serde_json::Error),
    #[error("Invalid mutation ID: {0}")]
    InvalidMutationId(String),
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
