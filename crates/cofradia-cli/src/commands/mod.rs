pub mod common;
pub mod conflicts;
pub mod purge;
pub mod queue;
pub mod resolve;
pub mod status;
pub mod submit;
pub mod sync;
pub mod watch;
