//! Schema bootstrap for the orchestration tables.

use crate::db::DbPool;
use crate::error::AppResult;

/// Schema holding all orchestration tables.
pub const SCHEMA: &str = "orchestration";

/// Statements are idempotent and run in order.
const DDL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS orchestration",
    r#"
    CREATE TABLE IF NOT EXISTS orchestration.event_log (
        id          BIGSERIAL PRIMARY KEY,
        owner_id    TEXT        NOT NULL,
        event_type  TEXT        NOT NULL,
        created_at  BIGINT      NOT NULL,
        payload     JSONB,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (owner_id, created_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orchestration.event_log_cursor (
        owner_id        TEXT   PRIMARY KEY,
        last_created_at BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orchestration.execution_record (
        id                TEXT        PRIMARY KEY,
        plan_execution_id TEXT        NOT NULL,
        status            TEXT        NOT NULL,
        fields            JSONB       NOT NULL DEFAULT '{}'::jsonb,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at        TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS execution_record_plan_idx
        ON orchestration.execution_record (plan_execution_id)
    "#,
];

/// Create the schema and tables if they do not exist.
pub async fn ensure_schema(pool: &DbPool) -> AppResult<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(schema = SCHEMA, "Orchestration schema ready");
    Ok(())
}
