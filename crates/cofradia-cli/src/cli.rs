use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use cofradia_core::{MutationStatus, OperationKind, Resolution};

#[derive(Parser)]
#[command(name = "cofradia")]
#[command(about = "Inspect and drive the offline mutation queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local queue database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a write; applied live on a good network, queued otherwise
    Submit {
        /// Target resource (table), e.g. `members`
        resource: String,
        #[arg(value_enum)]
        operation: OperationArg,
        /// JSON payload
        payload: String,
        /// Record id, when the payload has no `id` field
        #[arg(long, value_name = "ID")]
        record_id: Option<String>,
        /// Remote version (`updated_at`) the change was made against
        #[arg(long, value_name = "VERSION")]
        base_version: Option<String>,
    },
    /// List queued mutations
    Queue {
        /// Only show mutations with this status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show connectivity, pending count and conflicts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one drain pass now
    Sync,
    /// List mutations held back by conflicts or rejections
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retry or discard a held mutation
    #[command(group(ArgGroup::new("resolution").required(true).args(["retry", "discard"])))]
    Resolve {
        /// Mutation ID
        mutation_id: String,
        /// Put the mutation back in the queue
        #[arg(long)]
        retry: bool,
        /// Drop the mutation
        #[arg(long)]
        discard: bool,
    },
    /// Delete synced rows left in the queue
    Purge,
    /// Keep syncing in the foreground until interrupted
    Watch,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OperationArg {
    Create,
    Update,
    Delete,
}

impl From<OperationArg> for OperationKind {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Create => Self::Create,
            OperationArg::Update => Self::Update,
            OperationArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Pending,
    InFlight,
    Synced,
    Failed,
}

impl From<StatusArg> for MutationStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::InFlight => Self::InFlight,
            StatusArg::Synced => Self::Synced,
            StatusArg::Failed => Self::Failed,
        }
    }
}

/// Maps the `--retry` / `--discard` pair; clap guarantees exactly one is set.
pub const fn resolution_from_flags(retry: bool) -> Resolution {
    if retry {
        Resolution::Retry
    } else {
        Resolution::Discard
    }
}
