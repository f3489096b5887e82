//! Change event dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::event::{ChangeEvent, ChangeMetadata, OperationType};
use super::handler::ChangeHandler;
use super::key::parse_entity_id;
use crate::error::AppError;
use crate::result_ext::ResultExt;

/// Lifecycle of a dispatcher. Only `Started -> Stopped` is possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Started,
    Stopped,
}

/// How a dispatched event was resolved without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler processed the event.
    Handled,
    /// No handler is registered for the entity.
    NoHandler,
    /// The operation type is not one the dispatcher routes.
    Ignored,
    /// The key could not be parsed; the event is discarded.
    Dropped,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatcher is stopped")]
    Stopped,

    #[error("Handler for {entity} failed on {operation} of {id}: {source}")]
    Handler {
        entity: String,
        id: String,
        operation: OperationType,
        #[source]
        source: AppError,
    },
}

impl DispatchError {
    /// Whether redelivering the event may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Stopped => false,
            DispatchError::Handler { source, .. } => source.is_retryable(),
        }
    }
}

/// Routes change events to handlers registered per entity.
pub struct ChangeEventDispatcher {
    handlers: HashMap<String, Arc<dyn ChangeHandler>>,
    state: watch::Sender<DispatcherState>,
}

impl ChangeEventDispatcher {
    pub fn new() -> Self {
        let (state, _) = watch::channel(DispatcherState::Started);
        Self {
            handlers: HashMap::new(),
            state,
        }
    }

    /// Register a handler under its entity name, replacing any previous one.
    pub fn register<H: ChangeHandler + 'static>(&mut self, handler: H) {
        let entity = handler.entity().to_string();
        if self.handlers.insert(entity.clone(), Arc::new(handler)).is_some() {
            warn!(entity = %entity, "Replaced change handler");
        }
    }

    pub fn has_handler(&self, entity: &str) -> bool {
        self.handlers.contains_key(entity)
    }

    pub fn entities(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Receiver that observes the transition to `Stopped`.
    pub fn subscribe(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    pub fn stop(&self) {
        let previous = self.state.send_replace(DispatcherState::Stopped);
        if previous == DispatcherState::Started {
            info!("Change event dispatcher stopped");
        }
    }

    /// Route one change event to the handler for `metadata.entity`.
    ///
    /// `timestamp` is when the event was observed by the caller; it is only
    /// used to report lag against the source timestamp.
    pub async fn dispatch(
        &self,
        event: &ChangeEvent,
        metadata: &ChangeMetadata,
        timestamp: i64,
    ) -> Result<DispatchOutcome, DispatchError> {
        if self.state() == DispatcherState::Stopped {
            return Err(DispatchError::Stopped);
        }

        let id = match parse_entity_id(&event.key).log(format!(
            "dropping {} change event for {}",
            event.operation_type, metadata.entity
        )) {
            Ok(id) => id,
            Err(_) => return Ok(DispatchOutcome::Dropped),
        };

        let Some(handler) = self.handlers.get(&metadata.entity) else {
            warn!(
                entity = %metadata.entity,
                id = %id,
                operation = %event.operation_type,
                "No change handler registered"
            );
            return Ok(DispatchOutcome::NoHandler);
        };

        debug!(
            entity = %metadata.entity,
            id = %id,
            operation = %event.operation_type,
            source = metadata.source.as_deref().unwrap_or(""),
            lag_ms = timestamp.saturating_sub(event.timestamp),
            "Dispatching change event"
        );

        let value = event.value.as_deref();
        let result = match event.operation_type {
            OperationType::Snapshot | OperationType::Create => {
                handler.handle_create_event(&id, value).await
            }
            OperationType::Update => handler.handle_update_event(&id, value).await,
            OperationType::Delete => handler.handle_delete_event(&id).await,
            OperationType::Unknown => {
                debug!(entity = %metadata.entity, id = %id, "Ignoring unknown operation");
                return Ok(DispatchOutcome::Ignored);
            }
        };

        result.map_err(|source| DispatchError::Handler {
            entity: metadata.entity.clone(),
            id,
            operation: event.operation_type,
            source,
        })?;

        Ok(DispatchOutcome::Handled)
    }
}

impl Default for ChangeEventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
