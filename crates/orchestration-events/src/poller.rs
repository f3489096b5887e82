//! Consumer-side watermark tracking over an owner's event log.

use tracing::debug;

use crate::db::models::EventLogEntry;
use crate::error::AppResult;
use crate::services::EventLogService;

/// Reads one owner's log in order, remembering how far it got.
///
/// Entries are delivered at least once: an entry appended while a batch is
/// in flight is picked up by the next poll, and a consumer that restarts
/// from an older watermark sees entries again.
pub struct EventLogPoller {
    event_log: EventLogService,
    owner_id: String,
    watermark: i64,
}

impl EventLogPoller {
    pub fn new(event_log: EventLogService, owner_id: impl Into<String>) -> Self {
        Self::starting_at(event_log, owner_id, 0)
    }

    /// Resume from a previously persisted watermark.
    pub fn starting_at(event_log: EventLogService, owner_id: impl Into<String>, watermark: i64) -> Self {
        Self {
            event_log,
            owner_id: owner_id.into(),
            watermark,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Fetch the next batch and move the watermark past its last entry.
    pub async fn poll_once(&mut self) -> AppResult<Vec<EventLogEntry>> {
        let batch = self
            .event_log
            .find_unprocessed(&self.owner_id, self.watermark)
            .await?;

        if let Some(last) = batch.last() {
            self.watermark = last.created_at + 1;
        }
        Ok(batch)
    }

    /// Poll until a batch shorter than the store's limit comes back.
    pub async fn drain(&mut self) -> AppResult<Vec<EventLogEntry>> {
        let limit = self.event_log.batch_limit();
        let mut drained = Vec::new();

        loop {
            let batch = self.poll_once().await?;
            let full = batch.len() >= limit;
            drained.extend(batch);
            if !full {
                break;
            }
        }

        debug!(
            owner_id = %self.owner_id,
            drained = drained.len(),
            watermark = self.watermark,
            "Event log drained"
        );
        Ok(drained)
    }
}
