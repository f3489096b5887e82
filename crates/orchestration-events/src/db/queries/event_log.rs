//! Event log database queries.

use crate::db::models::{EventLogRow, OrchestrationEventType};
use crate::db::DbPool;
use crate::error::AppResult;

/// Advance the owner's cursor and return the new logical timestamp.
///
/// The upsert row-locks the cursor, so concurrent appends for one owner are
/// serialized and the timestamp comes from the server clock, never below
/// `last + 1`.
const ADVANCE_CURSOR: &str = r#"
    INSERT INTO orchestration.event_log_cursor (owner_id, last_created_at)
    VALUES ($1, (EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT)
    ON CONFLICT (owner_id) DO UPDATE
    SET last_created_at = GREATEST(
        orchestration.event_log_cursor.last_created_at + 1,
        EXCLUDED.last_created_at
    )
    RETURNING last_created_at
"#;

/// Append an event for `owner_id`. Cursor advance and insert commit together.
pub async fn insert_event(
    pool: &DbPool,
    owner_id: &str,
    event_type: OrchestrationEventType,
    payload: Option<&serde_json::Value>,
) -> AppResult<EventLogRow> {
    let mut tx = pool.begin().await?;

    let (created_at,): (i64,) = sqlx::query_as(ADVANCE_CURSOR)
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;

    let row = sqlx::query_as::<_, EventLogRow>(
        r#"
        INSERT INTO orchestration.event_log (owner_id, event_type, created_at, payload)
        VALUES ($1, $2, $3, $4)
        RETURNING id, owner_id, event_type, created_at, payload, recorded_at
        "#,
    )
    .bind(owner_id)
    .bind(event_type.as_str())
    .bind(created_at)
    .bind(payload)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// Entries with `created_at >= since`, oldest first, at most `limit`.
pub async fn get_events_since(
    pool: &DbPool,
    owner_id: &str,
    since: i64,
    limit: i64,
) -> AppResult<Vec<EventLogRow>> {
    let rows = sqlx::query_as::<_, EventLogRow>(
        r#"
        SELECT id, owner_id, event_type, created_at, payload, recorded_at
        FROM orchestration.event_log
        WHERE owner_id = $1 AND created_at >= $2
        ORDER BY created_at ASC
        LIMIT $3
        "#,
    )
    .bind(owner_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Delete every entry of `owner_id`. The cursor row stays, so later appends
/// keep counting past the purged timestamps.
pub async fn delete_events(pool: &DbPool, owner_id: &str) -> AppResult<u64> {
    let deleted = sqlx::query("DELETE FROM orchestration.event_log WHERE owner_id = $1")
        .bind(owner_id)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(deleted)
}
