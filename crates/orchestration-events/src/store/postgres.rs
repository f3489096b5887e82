//! PostgreSQL-backed stores.

use async_trait::async_trait;

use super::{EventLogStore, ExecutionStore, SetUpdate, DEFAULT_BATCH_LIMIT};
use crate::db::models::{
    EventLogEntry, EventLogRow, ExecutionRecord, ExecutionRow, ExecutionStatus,
    OrchestrationEventType,
};
use crate::db::queries::{event_log as log_queries, execution as execution_queries};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

fn decode_entry(row: EventLogRow) -> AppResult<EventLogEntry> {
    EventLogEntry::try_from(row).map_err(AppError::Internal)
}

fn decode_record(row: ExecutionRow) -> AppResult<ExecutionRecord> {
    ExecutionRecord::try_from(row).map_err(AppError::Internal)
}

/// Event log in `orchestration.event_log`.
#[derive(Clone)]
pub struct PgEventLogStore {
    pool: DbPool,
    batch_limit: usize,
}

impl PgEventLogStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }
}

#[async_trait]
impl EventLogStore for PgEventLogStore {
    async fn append(
        &self,
        owner_id: &str,
        event_type: OrchestrationEventType,
        payload: Option<serde_json::Value>,
    ) -> AppResult<EventLogEntry> {
        let row = log_queries::insert_event(&self.pool, owner_id, event_type, payload.as_ref()).await?;
        decode_entry(row)
    }

    async fn find_unprocessed(&self, owner_id: &str, since: i64) -> AppResult<Vec<EventLogEntry>> {
        log_queries::get_events_since(&self.pool, owner_id, since, self.batch_limit as i64)
            .await?
            .into_iter()
            .map(decode_entry)
            .collect()
    }

    async fn delete_all(&self, owner_id: &str) -> AppResult<u64> {
        log_queries::delete_events(&self.pool, owner_id).await
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}

/// Execution records in `orchestration.execution_record`.
#[derive(Clone)]
pub struct PgExecutionStore {
    pool: DbPool,
}

impl PgExecutionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert(&self, record: &ExecutionRecord) -> AppResult<()> {
        execution_queries::insert_record(&self.pool, record).await
    }

    async fn get(&self, id: &str) -> AppResult<Option<ExecutionRecord>> {
        execution_queries::get_record(&self.pool, id)
            .await?
            .map(decode_record)
            .transpose()
    }

    async fn find_by_plan(&self, plan_execution_id: &str) -> AppResult<Vec<ExecutionRecord>> {
        execution_queries::get_records_by_plan(&self.pool, plan_execution_id)
            .await?
            .into_iter()
            .map(decode_record)
            .collect()
    }

    async fn add_to_set(
        &self,
        id: &str,
        field: &str,
        value: &serde_json::Value,
    ) -> AppResult<SetUpdate> {
        let outcome = execution_queries::add_to_set(&self.pool, id, field, value)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution record not found: {}", id)))?;

        if !outcome.is_set {
            return Err(AppError::Validation(format!(
                "Field {} of {} is not a set",
                field, id
            )));
        }

        Ok(if outcome.added {
            SetUpdate::Added
        } else {
            SetUpdate::AlreadyPresent
        })
    }

    async fn set_field(&self, id: &str, field: &str, value: &serde_json::Value) -> AppResult<()> {
        if execution_queries::set_field(&self.pool, id, field, value).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Execution record not found: {}", id)))
        }
    }

    async fn update_status(&self, id: &str, status: ExecutionStatus) -> AppResult<ExecutionRecord> {
        let row = execution_queries::update_status(&self.pool, id, status)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution record not found: {}", id)))?;
        decode_record(row)
    }
}
