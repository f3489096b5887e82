//! Service layer.
//!
//! Services encapsulate the core operations and coordinate between
//! callers (HTTP handlers, stream consumers) and the stores.

pub mod event_log;
pub mod execution;

pub use event_log::EventLogService;
pub use execution::{ExecutionStateUpdater, InboundResponseEvent, ResponseApplied};
