//! In-memory stores.
//!
//! Each mutation runs inside one write-lock critical section, which gives
//! the same atomicity the PostgreSQL store gets from row locks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{next_timestamp, EventLogStore, ExecutionStore, SetUpdate, DEFAULT_BATCH_LIMIT};
use crate::db::models::{EventLogEntry, ExecutionRecord, ExecutionStatus, OrchestrationEventType};
use crate::error::{AppError, AppResult};

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Default)]
struct OwnerLog {
    entries: Vec<EventLogEntry>,
    /// Survives purges so timestamps never repeat for an owner.
    last_created_at: Option<i64>,
}

#[derive(Default)]
struct LogState {
    owners: HashMap<String, OwnerLog>,
    next_id: i64,
}

/// Event log kept in process memory.
pub struct MemoryEventLogStore {
    state: RwLock<LogState>,
    batch_limit: usize,
    clock: Clock,
}

impl MemoryEventLogStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            batch_limit: DEFAULT_BATCH_LIMIT,
            clock: Arc::new(|| Utc::now().timestamp_millis()),
        }
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    /// Replace the wall clock, e.g. with a fixed reading in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for MemoryEventLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLogStore for MemoryEventLogStore {
    async fn append(
        &self,
        owner_id: &str,
        event_type: OrchestrationEventType,
        payload: Option<serde_json::Value>,
    ) -> AppResult<EventLogEntry> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;

        let log = state.owners.entry(owner_id.to_string()).or_default();
        let created_at = next_timestamp(log.last_created_at, (self.clock)());

        let entry = EventLogEntry {
            id,
            owner_id: owner_id.to_string(),
            event_type,
            created_at,
            payload,
            recorded_at: Utc::now(),
        };

        log.last_created_at = Some(created_at);
        log.entries.push(entry.clone());
        Ok(entry)
    }

    async fn find_unprocessed(&self, owner_id: &str, since: i64) -> AppResult<Vec<EventLogEntry>> {
        let state = self.state.read().await;
        let Some(log) = state.owners.get(owner_id) else {
            return Ok(Vec::new());
        };

        // entries are stored in created_at order
        let start = log.entries.partition_point(|e| e.created_at < since);
        Ok(log.entries[start..]
            .iter()
            .take(self.batch_limit)
            .cloned()
            .collect())
    }

    async fn delete_all(&self, owner_id: &str) -> AppResult<u64> {
        let mut state = self.state.write().await;
        Ok(state
            .owners
            .get_mut(owner_id)
            .map(|log| std::mem::take(&mut log.entries).len() as u64)
            .unwrap_or(0))
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}

/// Execution records kept in process memory.
#[derive(Default)]
pub struct MemoryExecutionStore {
    records: RwLock<HashMap<String, ExecutionRecord>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Execution record not found: {}", id))
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert(&self, record: &ExecutionRecord) -> AppResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(AppError::Conflict(format!(
                "Execution record already exists: {}",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> AppResult<Option<ExecutionRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_by_plan(&self, plan_execution_id: &str) -> AppResult<Vec<ExecutionRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| r.plan_execution_id == plan_execution_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn add_to_set(
        &self,
        id: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> AppResult<SetUpdate> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| not_found(id))?;

        let slot = record
            .fields
            .entry(field.to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        let members = slot.as_array_mut().ok_or_else(|| {
            AppError::Validation(format!("Field {} of {} is not a set", field, id))
        })?;

        if members.contains(value) {
            return Ok(SetUpdate::AlreadyPresent);
        }
        members.push(value.clone());
        record.updated_at = Utc::now();
        Ok(SetUpdate::Added)
    }

    async fn set_field(&self, id: &str, field: &str, value: &serde_json::Value) -> AppResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| not_found(id))?;
        record.fields.insert(field.to_string(), value.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(&self, id: &str, status: ExecutionStatus) -> AppResult<ExecutionRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| not_found(id))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_clock(now: i64) -> Clock {
        Arc::new(move || now)
    }

    #[tokio::test]
    async fn test_append_yields_strictly_increasing_timestamps() {
        let store = MemoryEventLogStore::new().with_clock(fixed_clock(1));
        for _ in 0..5 {
            store
                .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
                .await
                .unwrap();
        }

        let entries = store.find_unprocessed("exec-1", 0).await.unwrap();
        assert_eq!(entries.len(), 5);
        assert!(entries.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn test_find_unprocessed_from_watermark() {
        let store = MemoryEventLogStore::new().with_clock(fixed_clock(1));
        for _ in 0..3 {
            store
                .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
                .await
                .unwrap();
        }

        let entries = store.find_unprocessed("exec-1", 2).await.unwrap();
        let stamps: Vec<i64> = entries.iter().map(|e| e.created_at).collect();
        assert_eq!(stamps, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_find_unprocessed_never_below_watermark() {
        let store = MemoryEventLogStore::new();
        for _ in 0..20 {
            store
                .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
                .await
                .unwrap();
        }
        let all = store.find_unprocessed("exec-1", 0).await.unwrap();
        let watermark = all[7].created_at;

        let entries = store.find_unprocessed("exec-1", watermark).await.unwrap();
        assert_eq!(entries.len(), 13);
        assert!(entries.iter().all(|e| e.created_at >= watermark));
    }

    #[tokio::test]
    async fn test_find_unprocessed_is_capped() {
        let store = MemoryEventLogStore::new().with_batch_limit(4);
        for _ in 0..10 {
            store
                .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
                .await
                .unwrap();
        }

        let entries = store.find_unprocessed("exec-1", 0).await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(store.batch_limit(), 4);
    }

    #[tokio::test]
    async fn test_owners_are_isolated() {
        let store = MemoryEventLogStore::new();
        store
            .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
            .await
            .unwrap();
        store
            .append("exec-2", OrchestrationEventType::OrchestrationStart, None)
            .await
            .unwrap();

        let entries = store.find_unprocessed("exec-2", 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, OrchestrationEventType::OrchestrationStart);
    }

    #[tokio::test]
    async fn test_delete_all_is_idempotent() {
        let store = MemoryEventLogStore::new();
        store
            .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
            .await
            .unwrap();

        assert_eq!(store.delete_all("exec-1").await.unwrap(), 1);
        assert!(store.find_unprocessed("exec-1", 0).await.unwrap().is_empty());
        assert_eq!(store.delete_all("exec-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_after_purge_continues_past_old_timestamps() {
        let store = MemoryEventLogStore::new().with_clock(fixed_clock(1));
        let mut last = 0;
        for _ in 0..3 {
            last = store
                .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
                .await
                .unwrap()
                .created_at;
        }
        assert_eq!(last, 3);

        assert_eq!(store.delete_all("exec-1").await.unwrap(), 3);
        let late = store
            .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
            .await
            .unwrap();

        assert!(late.created_at > last);
        let entries = store.find_unprocessed("exec-1", last + 1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, late.id);
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_monotonic() {
        let store = Arc::new(MemoryEventLogStore::new().with_clock(fixed_clock(100)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store
                        .append("exec-1", OrchestrationEventType::NodeExecutionUpdate, None)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entries = store.find_unprocessed("exec-1", 0).await.unwrap();
        assert_eq!(entries.len(), 200);
        assert!(entries.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn test_add_to_set_deduplicates_equal_values() {
        let store = MemoryExecutionStore::new();
        store.insert(&ExecutionRecord::new("node-1", "plan-1")).await.unwrap();

        let resp = json!({"taskId": "t-1", "kind": "async"});
        assert_eq!(
            store.add_to_set("node-1", "responses", &resp).await.unwrap(),
            SetUpdate::Added
        );
        assert_eq!(
            store.add_to_set("node-1", "responses", &resp).await.unwrap(),
            SetUpdate::AlreadyPresent
        );

        let record = store.get("node-1").await.unwrap().unwrap();
        assert_eq!(record.set_members("responses").len(), 1);
    }

    #[tokio::test]
    async fn test_add_to_set_missing_record() {
        let store = MemoryExecutionStore::new();
        let result = store.add_to_set("ghost", "responses", &json!(1)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_to_set_rejects_non_array_field() {
        let store = MemoryExecutionStore::new();
        store.insert(&ExecutionRecord::new("node-1", "plan-1")).await.unwrap();
        store.set_field("node-1", "responses", &json!("scalar")).await.unwrap();

        let result = store.add_to_set("node-1", "responses", &json!(1)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_insert_conflict_and_status_update() {
        let store = MemoryExecutionStore::new();
        let record = ExecutionRecord::new("node-1", "plan-1");
        store.insert(&record).await.unwrap();
        assert!(matches!(store.insert(&record).await, Err(AppError::Conflict(_))));

        let updated = store
            .update_status("node-1", ExecutionStatus::Running)
            .await
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Running);
        assert_eq!(store.find_by_plan("plan-1").await.unwrap().len(), 1);
    }
}
