//! Change-data-capture dispatch.
//!
//! Change events are classified by operation type and routed to the
//! handler registered for their entity.

pub mod cleanup;
pub mod dispatcher;
pub mod event;
pub mod handler;
pub mod key;

pub use cleanup::{ExecutionCleanupHandler, EXECUTION_RECORD_ENTITY};
pub use dispatcher::{ChangeEventDispatcher, DispatchError, DispatchOutcome, DispatcherState};
pub use event::{ChangeEvent, ChangeMetadata, OperationType};
pub use handler::ChangeHandler;
pub use key::parse_entity_id;
