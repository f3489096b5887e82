//! Error types for the orchestration event subsystem.
//!
//! `AppError` carries both the structural failures of the core (missing
//! records, malformed change-event keys, partially applied updates) and the
//! ambient failures of the surrounding service (storage, messaging,
//! configuration). It implements `IntoResponse` so Axum handlers can return
//! it directly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Target record does not exist (never created or already purged).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Change-data-capture key could not be parsed into an entity id.
    #[error("Malformed change event key: {0}")]
    MalformedKey(String),

    /// State mutation succeeded but the event log append did not.
    #[error("Partial failure for execution {execution_id} (runtime {runtime_id}): {source}")]
    PartialFailure {
        execution_id: String,
        runtime_id: String,
        source: Box<AppError>,
    },

    /// Transient storage unavailability (timeout, connection loss).
    #[error("Retryable storage error: {0}")]
    RetryableStorage(String),

    /// Non-transient database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict error (e.g., duplicate record)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// NATS messaging error
    #[error("NATS error: {0}")]
    Nats(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same operation with backoff can succeed.
    ///
    /// Structural failures (`NotFound`, `MalformedKey`, `Validation`) repeat
    /// deterministically and are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RetryableStorage(_) | AppError::PartialFailure { .. } | AppError::Nats(_)
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_) => AppError::RetryableStorage(err.to_string()),
            sqlx::Error::Database(ref db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                // serialization_failure, deadlock_detected
                match code.as_deref() {
                    Some("40001") | Some("40P01") => AppError::RetryableStorage(err.to_string()),
                    Some("23505") => AppError::Conflict(err.to_string()),
                    _ => AppError::Database(err),
                }
            }
            other => AppError::Database(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::MalformedKey(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::PartialFailure { .. } => {
                tracing::error!(error = %self, "Partial failure");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::RetryableStorage(msg) => {
                tracing::warn!(error = %msg, "Storage unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Serialization(e) => {
                tracing::error!(error = %e, "Serialization error");
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Nats(msg) => {
                tracing::error!(error = %msg, "NATS error");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
