//! Execution record API handlers.
//!
//! Records are created and moved through their lifecycle here; response
//! events posted to `/api/executions/responses` take the same path as
//! those consumed from the response stream.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{ExecutionRecord, ExecutionStatus};
use crate::error::AppError;
use crate::services::InboundResponseEvent;
use crate::state::AppState;
use crate::store::SetUpdate;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExecutionRequest {
    pub id: String,
    pub plan_execution_id: String,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetFieldRequest {
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseAppliedBody {
    pub execution_id: String,
    pub runtime_id: String,
    /// False when the descriptor was already recorded.
    pub added: bool,
    pub created_at: i64,
}

/// Create a record.
///
/// POST /api/executions
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateExecutionRequest>,
) -> Result<(StatusCode, Json<ExecutionRecord>), AppError> {
    if request.id.is_empty() || request.plan_execution_id.is_empty() {
        return Err(AppError::Validation(
            "id and planExecutionId are required".to_string(),
        ));
    }

    let mut record = ExecutionRecord::new(request.id, request.plan_execution_id);
    if let Some(status) = request.status {
        record.status = status;
    }
    record.fields = request.fields;

    state.updater.create_record(&record).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/executions/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionRecord>, AppError> {
    Ok(Json(state.updater.get_record(&id).await?))
}

/// Records belonging to a plan.
///
/// GET /api/executions/{id}/records
pub async fn list_for_plan(
    State(state): State<AppState>,
    Path(plan_execution_id): Path<String>,
) -> Result<Json<Vec<ExecutionRecord>>, AppError> {
    Ok(Json(state.updater.records_for_plan(&plan_execution_id).await?))
}

/// PUT /api/executions/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<ExecutionRecord>, AppError> {
    Ok(Json(state.updater.update_status(&id, request.status).await?))
}

/// PUT /api/executions/{id}/fields/{field}
pub async fn set_field(
    State(state): State<AppState>,
    Path((id, field)): Path<(String, String)>,
    Json(request): Json<SetFieldRequest>,
) -> Result<Json<ExecutionRecord>, AppError> {
    Ok(Json(state.updater.set_field(&id, &field, request.value).await?))
}

/// Apply an inbound response event.
///
/// POST /api/executions/responses
pub async fn apply_response(
    State(state): State<AppState>,
    Json(event): Json<InboundResponseEvent>,
) -> Result<Json<ResponseAppliedBody>, AppError> {
    let applied = state.updater.apply_response_event(&event).await?;

    Ok(Json(ResponseAppliedBody {
        execution_id: event.ambiance.plan_execution_id.clone(),
        runtime_id: event.ambiance.runtime_id().unwrap_or_default().to_string(),
        added: applied.update == SetUpdate::Added,
        created_at: applied.entry.created_at,
    }))
}
