//! Models for the orchestration tables.

pub mod event_log;
pub mod execution;

pub use event_log::*;
pub use execution::*;
