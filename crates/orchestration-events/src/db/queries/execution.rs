//! Execution record database queries.
//!
//! Mutations are field-level (`jsonb_set`) so concurrent writers touching
//! different fields of one record never lose each other's updates.

use crate::db::models::{ExecutionRecord, ExecutionRow, ExecutionStatus};
use crate::db::DbPool;
use crate::error::AppResult;

const SELECT_COLUMNS: &str =
    "id, plan_execution_id, status, fields, created_at, updated_at";

/// Insert a new record.
pub async fn insert_record(pool: &DbPool, record: &ExecutionRecord) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orchestration.execution_record
            (id, plan_execution_id, status, fields, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&record.id)
    .bind(&record.plan_execution_id)
    .bind(record.status.as_str())
    .bind(serde_json::Value::Object(record.fields.clone()))
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a record by runtime id.
pub async fn get_record(pool: &DbPool, id: &str) -> AppResult<Option<ExecutionRow>> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {} FROM orchestration.execution_record WHERE id = $1",
        SELECT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// All records of a plan, oldest first.
pub async fn get_records_by_plan(
    pool: &DbPool,
    plan_execution_id: &str,
) -> AppResult<Vec<ExecutionRow>> {
    let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {} FROM orchestration.execution_record \
         WHERE plan_execution_id = $1 ORDER BY created_at ASC",
        SELECT_COLUMNS
    ))
    .bind(plan_execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Result of an atomic add-to-set.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct AddToSetRow {
    /// The field was absent or already an array.
    pub is_set: bool,
    /// The value was appended by this statement.
    pub added: bool,
}

/// Append `value` to the array at `fields->field` unless an equal element
/// is present. `None` when the record does not exist.
pub async fn add_to_set(
    pool: &DbPool,
    id: &str,
    field: &str,
    value: &serde_json::Value,
) -> AppResult<Option<AddToSetRow>> {
    let row = sqlx::query_as::<_, AddToSetRow>(
        r#"
        WITH target AS (
            SELECT id,
                   fields -> $2::text AS current,
                   (fields -> $2::text IS NULL
                    OR jsonb_typeof(fields -> $2::text) = 'array') AS is_set
            FROM orchestration.execution_record
            WHERE id = $1
            FOR UPDATE
        ),
        present AS (
            SELECT EXISTS (
                SELECT 1
                FROM target t,
                     jsonb_array_elements(
                         CASE WHEN jsonb_typeof(t.current) = 'array'
                              THEN t.current ELSE '[]'::jsonb END
                     ) AS e(v)
                WHERE e.v = $3::jsonb
            ) AS found
        ),
        updated AS (
            UPDATE orchestration.execution_record r
            SET fields = jsonb_set(
                    r.fields,
                    ARRAY[$2::text],
                    COALESCE(t.current, '[]'::jsonb) || jsonb_build_array($3::jsonb),
                    true
                ),
                updated_at = now()
            FROM target t, present p
            WHERE r.id = t.id AND t.is_set AND NOT p.found
            RETURNING r.id
        )
        SELECT t.is_set, EXISTS (SELECT 1 FROM updated) AS added
        FROM target t
        "#,
    )
    .bind(id)
    .bind(field)
    .bind(value)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Set `fields->field = value`. Returns false when the record does not exist.
pub async fn set_field(
    pool: &DbPool,
    id: &str,
    field: &str,
    value: &serde_json::Value,
) -> AppResult<bool> {
    let affected = sqlx::query(
        r#"
        UPDATE orchestration.execution_record
        SET fields = jsonb_set(fields, ARRAY[$2::text], $3::jsonb, true),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(field)
    .bind(value)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected > 0)
}

/// Set the status column and return the updated row.
pub async fn update_status(
    pool: &DbPool,
    id: &str,
    status: ExecutionStatus,
) -> AppResult<Option<ExecutionRow>> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        "UPDATE orchestration.execution_record SET status = $2, updated_at = now() \
         WHERE id = $1 RETURNING {}",
        SELECT_COLUMNS
    ))
    .bind(id)
    .bind(status.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
