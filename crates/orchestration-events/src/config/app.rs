//! Service configuration for the orchestration event service.

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// PostgreSQL via SQLx.
    Postgres,
    /// Process-local in-memory stores (development and tests).
    Memory,
}

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `ORCH_`:
/// - `ORCH_HOST` / `ORCH_PORT`: HTTP bind address (default `0.0.0.0:8090`)
/// - `ORCH_STORAGE`: `postgres` or `memory` (default `postgres`)
/// - `ORCH_EVENT_BATCH_LIMIT`: max entries per `find_unprocessed` (default 1000)
/// - `ORCH_NATS_URL`: NATS server; stream consumers are disabled when unset
/// - `ORCH_CDC_STREAM`, `ORCH_CDC_SUBJECT_PREFIX`, `ORCH_CDC_CONSUMER`
/// - `ORCH_RESPONSE_STREAM`, `ORCH_RESPONSE_SUBJECT`, `ORCH_RESPONSE_CONSUMER`
/// - `ORCH_RETRY_INITIAL_DELAY_MS`, `ORCH_RETRY_MAX_DELAY_MS`, `ORCH_RETRY_MAX_RETRIES`
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_storage")]
    pub storage: StorageBackend,

    /// Upper bound on entries returned by one `find_unprocessed` call.
    #[serde(default = "default_event_batch_limit")]
    pub event_batch_limit: usize,

    #[serde(default)]
    pub nats_url: Option<String>,

    #[serde(default = "default_cdc_stream")]
    pub cdc_stream: String,

    /// Change events arrive on `<prefix>.<entity>`.
    #[serde(default = "default_cdc_subject_prefix")]
    pub cdc_subject_prefix: String,

    #[serde(default = "default_cdc_consumer")]
    pub cdc_consumer: String,

    #[serde(default = "default_response_stream")]
    pub response_stream: String,

    #[serde(default = "default_response_subject")]
    pub response_subject: String,

    #[serde(default = "default_response_consumer")]
    pub response_consumer: String,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_retry_max_retries")]
    pub retry_max_retries: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_storage() -> StorageBackend {
    StorageBackend::Postgres
}

fn default_event_batch_limit() -> usize {
    1000
}

fn default_cdc_stream() -> String {
    "orchestration_cdc".to_string()
}

fn default_cdc_subject_prefix() -> String {
    "orchestration.cdc".to_string()
}

fn default_cdc_consumer() -> String {
    "orchestration-events-cdc".to_string()
}

fn default_response_stream() -> String {
    "orchestration_responses".to_string()
}

fn default_response_subject() -> String {
    "orchestration.responses".to_string()
}

fn default_response_consumer() -> String {
    "orchestration-events-responses".to_string()
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_retry_max_retries() -> usize {
    5
}

impl AppConfig {
    /// Load configuration from `ORCH_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("ORCH_").from_env::<AppConfig>()
    }

    /// Server bind address suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Backoff policy for retryable storage and messaging failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: self.retry_initial_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
            max_retries: self.retry_max_retries,
        }
    }

    /// Wildcard subject covering every entity's change events.
    pub fn cdc_subject_filter(&self) -> String {
        format!("{}.>", self.cdc_subject_prefix)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage: default_storage(),
            event_batch_limit: default_event_batch_limit(),
            nats_url: None,
            cdc_stream: default_cdc_stream(),
            cdc_subject_prefix: default_cdc_subject_prefix(),
            cdc_consumer: default_cdc_consumer(),
            response_stream: default_response_stream(),
            response_subject: default_response_subject(),
            response_consumer: default_response_consumer(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_max_retries: default_retry_max_retries(),
        }
    }
}
