//! Shared services built on top of the database layer.

mod queue;

pub use queue::QueueService;
