//! Execution state updates driven by inbound response events.
//!
//! Every successful mutation of an execution record is followed by an
//! append to the owning plan's event log. Record mutations are idempotent;
//! log appends are not deduplicated, so the log delivers at-least-once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::db::models::{
    EventLogEntry, ExecutionRecord, ExecutionStatus, OrchestrationEventType,
    EXECUTABLE_RESPONSES_FIELD,
};
use crate::error::{AppError, AppResult};
use crate::services::EventLogService;
use crate::store::{ExecutionStore, SetUpdate};

/// One level of the execution context; the innermost level is last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub runtime_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

/// Execution context carried with every response event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ambiance {
    pub plan_execution_id: String,
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl Ambiance {
    /// Runtime id of the innermost level.
    pub fn runtime_id(&self) -> Option<&str> {
        self.levels.last().map(|l| l.runtime_id.as_str())
    }
}

/// Response reported by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    /// Opaque descriptor accumulated into the record's response set.
    pub executable_response: serde_json::Value,
}

/// Event on the inbound response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundResponseEvent {
    pub ambiance: Ambiance,
    pub response_event: ResponseEvent,
}

/// Result of applying one response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseApplied {
    /// Whether the descriptor was new to the record.
    pub update: SetUpdate,
    /// Log entry recording the update attempt.
    pub entry: EventLogEntry,
}

/// Applies idempotent partial updates to execution records and records
/// each update in the event log.
#[derive(Clone)]
pub struct ExecutionStateUpdater {
    executions: Arc<dyn ExecutionStore>,
    event_log: EventLogService,
}

impl ExecutionStateUpdater {
    pub fn new(executions: Arc<dyn ExecutionStore>, event_log: EventLogService) -> Self {
        Self {
            executions,
            event_log,
        }
    }

    pub fn event_log(&self) -> &EventLogService {
        &self.event_log
    }

    /// Add `descriptor` to the response set of record `runtime_id`, then
    /// append `NODE_EXECUTION_UPDATE` for `execution_id`.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the record does not exist; nothing is logged.
    /// - `PartialFailure` when the record was updated but the append
    ///   failed; retry with [`append_update_event`](Self::append_update_event).
    pub async fn apply_response_and_log(
        &self,
        execution_id: &str,
        runtime_id: &str,
        descriptor: &serde_json::Value,
    ) -> AppResult<ResponseApplied> {
        let update = self
            .executions
            .add_to_set(runtime_id, EXECUTABLE_RESPONSES_FIELD, descriptor)
            .await?;

        let entry = self
            .append_update_event(execution_id, runtime_id)
            .await
            .map_err(|e| partial_failure(execution_id, runtime_id, e))?;

        info!(
            execution_id = %execution_id,
            runtime_id = %runtime_id,
            added = update == SetUpdate::Added,
            created_at = entry.created_at,
            "Executable response applied"
        );

        Ok(ResponseApplied { update, entry })
    }

    /// Apply an event from the inbound response stream.
    pub async fn apply_response_event(
        &self,
        event: &InboundResponseEvent,
    ) -> AppResult<ResponseApplied> {
        let execution_id = event.ambiance.plan_execution_id.as_str();
        if execution_id.is_empty() {
            return Err(AppError::Validation(
                "Ambiance has no plan execution id".to_string(),
            ));
        }

        let runtime_id = event.ambiance.runtime_id().ok_or_else(|| {
            AppError::Validation(format!(
                "Ambiance of execution {} has no levels",
                execution_id
            ))
        })?;

        if event.response_event.executable_response.is_null() {
            return Err(AppError::Validation(
                "Response event carries no executable response".to_string(),
            ));
        }

        self.apply_response_and_log(execution_id, runtime_id, &event.response_event.executable_response)
            .await
    }

    /// Append the `NODE_EXECUTION_UPDATE` entry for a runtime id. Also the
    /// retry path after a `PartialFailure`.
    pub async fn append_update_event(
        &self,
        execution_id: &str,
        runtime_id: &str,
    ) -> AppResult<EventLogEntry> {
        self.event_log
            .append(
                execution_id,
                OrchestrationEventType::NodeExecutionUpdate,
                Some(json!({ "runtimeId": runtime_id })),
            )
            .await
    }

    /// Insert a new record. Plan-level records open their log with
    /// `ORCHESTRATION_START`.
    pub async fn create_record(&self, record: &ExecutionRecord) -> AppResult<()> {
        if let Some(responses) = record.fields.get(EXECUTABLE_RESPONSES_FIELD) {
            check_responses_field(responses)?;
        }
        self.executions.insert(record).await?;

        if record.is_plan() {
            self.event_log
                .append(
                    &record.plan_execution_id,
                    OrchestrationEventType::OrchestrationStart,
                    None,
                )
                .await
                .map_err(|e| partial_failure(&record.plan_execution_id, &record.id, e))?;
        }

        info!(
            execution_id = %record.plan_execution_id,
            runtime_id = %record.id,
            status = %record.status,
            "Execution record created"
        );
        Ok(())
    }

    pub async fn get_record(&self, runtime_id: &str) -> AppResult<ExecutionRecord> {
        self.executions
            .get(runtime_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Execution record not found: {}", runtime_id)))
    }

    pub async fn records_for_plan(&self, plan_execution_id: &str) -> AppResult<Vec<ExecutionRecord>> {
        self.executions.find_by_plan(plan_execution_id).await
    }

    /// Set a record's status and log it for the owning plan.
    ///
    /// A plan record reaching a terminal status closes the plan's log with
    /// `ORCHESTRATION_END`. Purging that log is left to terminal cleanup
    /// (see [`ExecutionCleanupHandler`](crate::cdc::ExecutionCleanupHandler)).
    pub async fn update_status(
        &self,
        runtime_id: &str,
        status: ExecutionStatus,
    ) -> AppResult<ExecutionRecord> {
        let record = self.executions.update_status(runtime_id, status).await?;

        let event_type = match (record.is_plan(), status.is_terminal()) {
            (true, true) => OrchestrationEventType::OrchestrationEnd,
            (true, false) => OrchestrationEventType::PlanExecutionStatusUpdate,
            (false, _) => OrchestrationEventType::NodeExecutionStatusUpdate,
        };

        self.event_log
            .append(
                &record.plan_execution_id,
                event_type,
                Some(json!({ "runtimeId": runtime_id, "status": status })),
            )
            .await
            .map_err(|e| partial_failure(&record.plan_execution_id, runtime_id, e))?;

        if event_type == OrchestrationEventType::OrchestrationEnd {
            info!(execution_id = %record.plan_execution_id, status = %status, "Plan execution ended");
        }
        Ok(record)
    }

    /// Overwrite one named field and log the update for the owning plan.
    pub async fn set_field(
        &self,
        runtime_id: &str,
        field: &str,
        value: serde_json::Value,
    ) -> AppResult<ExecutionRecord> {
        if field == EXECUTABLE_RESPONSES_FIELD {
            check_responses_field(&value)?;
        }

        self.executions.set_field(runtime_id, field, &value).await?;
        let record = self.get_record(runtime_id).await?;

        self.append_update_event(&record.plan_execution_id, runtime_id)
            .await
            .map_err(|e| partial_failure(&record.plan_execution_id, runtime_id, e))?;

        Ok(record)
    }

}

/// Response sets are stored as JSON arrays.
fn check_responses_field(value: &serde_json::Value) -> AppResult<()> {
    if value.is_array() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{} must be an array",
            EXECUTABLE_RESPONSES_FIELD
        )))
    }
}

fn partial_failure(execution_id: &str, runtime_id: &str, source: AppError) -> AppError {
    warn!(
        execution_id = %execution_id,
        runtime_id = %runtime_id,
        error = %source,
        "State updated but event log append failed"
    );
    AppError::PartialFailure {
        execution_id: execution_id.to_string(),
        runtime_id: runtime_id.to_string(),
        source: Box::new(source),
    }
}
