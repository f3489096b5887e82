//! Event log API handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::EventLogEntry;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventLogQuery {
    /// Watermark; entries with `created_at >= since` are returned.
    #[serde(default)]
    pub since: i64,
}

/// One batch of an owner's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogPage {
    pub owner_id: String,
    pub entries: Vec<EventLogEntry>,
    /// Watermark for the next request.
    pub next_watermark: i64,
    /// The batch was full; more entries may follow.
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub owner_id: String,
    pub deleted: u64,
}

/// Fetch unprocessed entries.
///
/// GET /api/event-log/{owner_id}?since={watermark}
pub async fn list(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Query(query): Query<EventLogQuery>,
) -> Result<Json<EventLogPage>, AppError> {
    let entries = state.event_log.find_unprocessed(&owner_id, query.since).await?;

    let next_watermark = entries
        .last()
        .map(|e| e.created_at + 1)
        .unwrap_or(query.since);
    let has_more = entries.len() >= state.event_log.batch_limit();

    Ok(Json(EventLogPage {
        owner_id,
        entries,
        next_watermark,
        has_more,
    }))
}

/// Purge an owner's log.
///
/// DELETE /api/event-log/{owner_id}
pub async fn purge(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Result<Json<PurgeResponse>, AppError> {
    let deleted = state.event_log.delete_all(&owner_id).await?;
    Ok(Json(PurgeResponse { owner_id, deleted }))
}
