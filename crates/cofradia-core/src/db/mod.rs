//! Local durable storage for queued mutations

mod connection;
mod migrations;
mod queue;

pub use connection::Database;
pub use queue::{LibSqlMutationQueue, MutationQueue};
