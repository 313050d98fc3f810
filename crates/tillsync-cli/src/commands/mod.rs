pub mod common;
pub mod completions;
pub mod conflicts;
pub mod delete;
pub mod list;
pub mod pull;
pub mod put;
pub mod queue;
pub mod status;
pub mod sync;
pub mod watch;
