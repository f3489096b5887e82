//! Event log service.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::models::{EventLogEntry, OrchestrationEventType};
use crate::error::AppResult;
use crate::store::EventLogStore;

/// Shared handle over an [`EventLogStore`] with structured logging.
#[derive(Clone)]
pub struct EventLogService {
    store: Arc<dyn EventLogStore>,
}

impl EventLogService {
    pub fn new(store: Arc<dyn EventLogStore>) -> Self {
        Self { store }
    }

    /// Append an entry for `owner_id`.
    pub async fn append(
        &self,
        owner_id: &str,
        event_type: OrchestrationEventType,
        payload: Option<serde_json::Value>,
    ) -> AppResult<EventLogEntry> {
        let entry = self.store.append(owner_id, event_type, payload).await?;

        debug!(
            owner_id = %owner_id,
            event_type = %event_type,
            created_at = entry.created_at,
            entry_id = entry.id,
            "Event log entry appended"
        );

        Ok(entry)
    }

    /// Next batch of entries at or after `since`. A full batch means more
    /// entries may remain; re-invoke with an advanced watermark.
    pub async fn find_unprocessed(&self, owner_id: &str, since: i64) -> AppResult<Vec<EventLogEntry>> {
        let entries = self.store.find_unprocessed(owner_id, since).await?;

        debug!(
            owner_id = %owner_id,
            since,
            returned = entries.len(),
            batch_limit = self.store.batch_limit(),
            "Fetched unprocessed events"
        );

        Ok(entries)
    }

    /// Purge the owner's log; safe to repeat.
    pub async fn delete_all(&self, owner_id: &str) -> AppResult<u64> {
        let deleted = self.store.delete_all(owner_id).await?;
        info!(owner_id = %owner_id, deleted, "Event log purged");
        Ok(deleted)
    }

    pub fn batch_limit(&self) -> usize {
        self.store.batch_limit()
    }
}
