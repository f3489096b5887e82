//! Shared application state passed to handlers via Axum's state management.

use std::sync::Arc;

use crate::cdc::ChangeEventDispatcher;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::services::{EventLogService, ExecutionStateUpdater};

#[derive(Clone)]
pub struct AppState {
    pub event_log: EventLogService,

    pub updater: ExecutionStateUpdater,

    pub dispatcher: Arc<ChangeEventDispatcher>,

    /// Database pool; `None` with the memory storage backend.
    pub db: Option<DbPool>,

    pub config: Arc<AppConfig>,

    /// NATS client (optional)
    pub nats: Option<Arc<async_nats::Client>>,

    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        updater: ExecutionStateUpdater,
        dispatcher: Arc<ChangeEventDispatcher>,
        config: AppConfig,
    ) -> Self {
        Self {
            event_log: updater.event_log().clone(),
            updater,
            dispatcher,
            db: None,
            config: Arc::new(config),
            nats: None,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_db(mut self, db: DbPool) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_nats(mut self, nats: async_nats::Client) -> Self {
        self.nats = Some(Arc::new(nats));
        self
    }

    /// Get the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if NATS is configured and connected.
    pub fn has_nats(&self) -> bool {
        self.nats.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cdc::ExecutionCleanupHandler;
    use crate::config::StorageBackend;
    use crate::store::{MemoryEventLogStore, MemoryExecutionStore};

    /// Memory-backed state as used by handler tests.
    pub(crate) fn memory_state() -> AppState {
        let event_log = EventLogService::new(Arc::new(MemoryEventLogStore::new()));
        let updater = ExecutionStateUpdater::new(Arc::new(MemoryExecutionStore::new()), event_log.clone());
        let mut dispatcher = ChangeEventDispatcher::new();
        dispatcher.register(ExecutionCleanupHandler::new(event_log));
        let config = AppConfig {
            storage: StorageBackend::Memory,
            ..AppConfig::default()
        };
        AppState::new(updater, Arc::new(dispatcher), config)
    }

    #[test]
    fn test_memory_state_has_no_external_resources() {
        let state = memory_state();
        assert!(state.db.is_none());
        assert!(!state.has_nats());
        assert!(state.dispatcher.has_handler("execution_record"));
        assert_eq!(state.uptime_seconds(), 0);
    }
}
