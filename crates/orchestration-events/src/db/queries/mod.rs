//! Database queries organized by table.

pub mod event_log;
pub mod execution;
