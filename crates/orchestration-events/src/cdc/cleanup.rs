//! Event log cleanup driven by execution record changes.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::handler::ChangeHandler;
use crate::db::models::ExecutionStatus;
use crate::error::AppResult;
use crate::services::EventLogService;

pub const EXECUTION_RECORD_ENTITY: &str = "execution_record";

/// Columns of an execution record row as captured at the source.
#[derive(Debug, Deserialize)]
struct RecordChange {
    #[serde(alias = "planExecutionId")]
    plan_execution_id: String,
    status: String,
}

/// Purges a plan's event log once the plan is finished or removed.
pub struct ExecutionCleanupHandler {
    event_log: EventLogService,
}

impl ExecutionCleanupHandler {
    pub fn new(event_log: EventLogService) -> Self {
        Self { event_log }
    }

    fn decode(id: &str, value: Option<&str>) -> Option<(String, ExecutionStatus)> {
        let raw = value?;
        let change: RecordChange = match serde_json::from_str(raw) {
            Ok(change) => change,
            Err(e) => {
                warn!(id = %id, error = %e, "Skipping undecodable execution record change");
                return None;
            }
        };
        match change.status.parse::<ExecutionStatus>() {
            Ok(status) => Some((change.plan_execution_id, status)),
            Err(e) => {
                warn!(id = %id, error = %e, "Skipping execution record change with unknown status");
                None
            }
        }
    }
}

#[async_trait]
impl ChangeHandler for ExecutionCleanupHandler {
    fn entity(&self) -> &str {
        EXECUTION_RECORD_ENTITY
    }

    async fn handle_create_event(&self, id: &str, _value: Option<&str>) -> AppResult<()> {
        debug!(id = %id, "Execution record created");
        Ok(())
    }

    async fn handle_update_event(&self, id: &str, value: Option<&str>) -> AppResult<()> {
        let Some((plan_execution_id, status)) = Self::decode(id, value) else {
            return Ok(());
        };

        if plan_execution_id == id && status.is_terminal() {
            let deleted = self.event_log.delete_all(&plan_execution_id).await?;
            info!(
                plan_execution_id = %plan_execution_id,
                status = %status,
                deleted,
                "Plan finished, event log purged"
            );
        }
        Ok(())
    }

    /// A deleted plan record takes its log with it. Node ids own no log, so
    /// purging them is a no-op.
    async fn handle_delete_event(&self, id: &str) -> AppResult<()> {
        let deleted = self.event_log.delete_all(id).await?;
        if deleted > 0 {
            info!(plan_execution_id = %id, deleted, "Plan record deleted, event log purged");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::{ChangeEvent, ChangeEventDispatcher, ChangeMetadata, DispatchOutcome, OperationType};
    use crate::db::models::OrchestrationEventType;
    use crate::store::MemoryEventLogStore;
    use std::sync::Arc;

    async fn seeded_log() -> EventLogService {
        let log = EventLogService::new(Arc::new(MemoryEventLogStore::new()));
        for _ in 0..2 {
            log.append("plan-1", OrchestrationEventType::NodeExecutionUpdate, None)
                .await
                .unwrap();
        }
        log
    }

    fn update(id: &str, value: &str) -> ChangeEvent {
        ChangeEvent {
            key: format!(r#"{{"id":"{}"}}"#, id),
            value: Some(value.to_string()),
            operation_type: OperationType::Update,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_terminal_plan_update_purges_log() {
        let log = seeded_log().await;
        let mut dispatcher = ChangeEventDispatcher::new();
        dispatcher.register(ExecutionCleanupHandler::new(log.clone()));

        let outcome = dispatcher
            .dispatch(
                &update("plan-1", r#"{"id":"plan-1","plan_execution_id":"plan-1","status":"SUCCEEDED"}"#),
                &ChangeMetadata::new(EXECUTION_RECORD_ENTITY),
                0,
            )
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(log.find_unprocessed("plan-1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_and_running_updates_keep_log() {
        let log = seeded_log().await;
        let handler = ExecutionCleanupHandler::new(log.clone());

        handler
            .handle_update_event("node-1", Some(r#"{"planExecutionId":"plan-1","status":"FAILED"}"#))
            .await
            .unwrap();
        handler
            .handle_update_event("plan-1", Some(r#"{"plan_execution_id":"plan-1","status":"RUNNING"}"#))
            .await
            .unwrap();

        assert_eq!(log.find_unprocessed("plan-1", 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_value_is_skipped() {
        let log = seeded_log().await;
        let handler = ExecutionCleanupHandler::new(log.clone());

        handler.handle_update_event("plan-1", Some("{broken")).await.unwrap();
        handler
            .handle_update_event("plan-1", Some(r#"{"plan_execution_id":"plan-1","status":"PAUSED"}"#))
            .await
            .unwrap();
        handler.handle_update_event("plan-1", None).await.unwrap();

        assert_eq!(log.find_unprocessed("plan-1", 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_plan_delete_purges_log() {
        let log = seeded_log().await;
        let handler = ExecutionCleanupHandler::new(log.clone());

        handler.handle_delete_event("node-1").await.unwrap();
        assert_eq!(log.find_unprocessed("plan-1", 0).await.unwrap().len(), 2);

        handler.handle_delete_event("plan-1").await.unwrap();
        assert!(log.find_unprocessed("plan-1", 0).await.unwrap().is_empty());
    }
}
