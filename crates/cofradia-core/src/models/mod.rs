//! Data models for the sync core

mod conflict;
mod mutation;

pub use conflict::{Conflict, ConflictId};
pub use mutation::{
    HoldReason, MutationId, MutationStatus, NewMutation, OperationKind, QueuedMutation,
};
