//! Persistence seams for the event log and execution records.
//!
//! Services operate exclusively through these traits so the backing store
//! can be PostgreSQL in production or process memory in tests and embedded
//! use.

mod memory;
mod postgres;

pub use memory::{Clock, MemoryEventLogStore, MemoryExecutionStore};
pub use postgres::{PgEventLogStore, PgExecutionStore};

use async_trait::async_trait;

use crate::db::models::{EventLogEntry, ExecutionRecord, ExecutionStatus, OrchestrationEventType};
use crate::error::AppResult;

/// Default cap on entries returned by one `find_unprocessed` call.
pub const DEFAULT_BATCH_LIMIT: usize = 1000;

/// Append-only, per-owner event log.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Persist a new entry whose `created_at` is strictly greater than any
    /// earlier entry of the same owner.
    async fn append(
        &self,
        owner_id: &str,
        event_type: OrchestrationEventType,
        payload: Option<serde_json::Value>,
    ) -> AppResult<EventLogEntry>;

    /// Entries with `created_at >= since`, ascending, at most
    /// [`batch_limit`](Self::batch_limit) of them.
    async fn find_unprocessed(&self, owner_id: &str, since: i64) -> AppResult<Vec<EventLogEntry>>;

    /// Remove every entry of the owner. Returns how many were removed;
    /// deleting an empty owner returns 0. Later appends still get
    /// timestamps above everything the owner was ever given.
    async fn delete_all(&self, owner_id: &str) -> AppResult<u64>;

    fn batch_limit(&self) -> usize;
}

/// Outcome of an add-to-set update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetUpdate {
    Added,
    AlreadyPresent,
}

/// Execution records with field-level atomic updates.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new record; `Conflict` if the id exists.
    async fn insert(&self, record: &ExecutionRecord) -> AppResult<()>;

    async fn get(&self, id: &str) -> AppResult<Option<ExecutionRecord>>;

    async fn find_by_plan(&self, plan_execution_id: &str) -> AppResult<Vec<ExecutionRecord>>;

    /// Add `value` to the array field unless an equal element exists.
    /// `NotFound` if the record is missing, `Validation` if the field holds
    /// a non-array value.
    async fn add_to_set(
        &self,
        id: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> AppResult<SetUpdate>;

    /// Overwrite one named field. `NotFound` if the record is missing.
    async fn set_field(&self, id: &str, field: &str, value: &serde_json::Value) -> AppResult<()>;

    /// Set the status and return the updated record.
    async fn update_status(&self, id: &str, status: ExecutionStatus) -> AppResult<ExecutionRecord>;
}

/// Next logical timestamp for an owner: the current clock reading, bumped
/// past the previous timestamp when the clock has not moved or went back.
pub fn next_timestamp(last: Option<i64>, now_ms: i64) -> i64 {
    match last {
        Some(last) => now_ms.max(last + 1),
        None => now_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_timestamp_first_entry_uses_clock() {
        assert_eq!(next_timestamp(None, 1_000), 1_000);
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        assert_eq!(next_timestamp(Some(1_000), 1_000), 1_001);
        assert_eq!(next_timestamp(Some(1_000), 2_000), 2_000);
    }

    #[test]
    fn test_next_timestamp_survives_clock_regression() {
        assert_eq!(next_timestamp(Some(5_000), 1_000), 5_001);
    }
}
