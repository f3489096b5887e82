//! Event log model.
//!
//! One immutable entry per state change of an execution. Entries of one
//! owner are totally ordered by `created_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Logical event types recorded in the orchestration event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEventType {
    /// A node execution record was mutated (e.g. a response was added).
    NodeExecutionUpdate,
    /// A node execution changed status.
    NodeExecutionStatusUpdate,
    /// A plan execution changed status.
    PlanExecutionStatusUpdate,
    /// Orchestration of a plan started.
    OrchestrationStart,
    /// Orchestration of a plan ended.
    OrchestrationEnd,
}

impl OrchestrationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeExecutionUpdate => "NODE_EXECUTION_UPDATE",
            Self::NodeExecutionStatusUpdate => "NODE_EXECUTION_STATUS_UPDATE",
            Self::PlanExecutionStatusUpdate => "PLAN_EXECUTION_STATUS_UPDATE",
            Self::OrchestrationStart => "ORCHESTRATION_START",
            Self::OrchestrationEnd => "ORCHESTRATION_END",
        }
    }
}

impl std::fmt::Display for OrchestrationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrchestrationEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NODE_EXECUTION_UPDATE" => Ok(Self::NodeExecutionUpdate),
            "NODE_EXECUTION_STATUS_UPDATE" => Ok(Self::NodeExecutionStatusUpdate),
            "PLAN_EXECUTION_STATUS_UPDATE" => Ok(Self::PlanExecutionStatusUpdate),
            "ORCHESTRATION_START" => Ok(Self::OrchestrationStart),
            "ORCHESTRATION_END" => Ok(Self::OrchestrationEnd),
            other => Err(format!("Unknown orchestration event type: {}", other)),
        }
    }
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Store-assigned identifier.
    pub id: i64,

    /// Owning plan execution id.
    pub owner_id: String,

    pub event_type: OrchestrationEventType,

    /// Logical timestamp (epoch millis), strictly increasing per owner.
    pub created_at: i64,

    /// Opaque payload reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Wall-clock time the entry was written. Informational only; ordering
    /// uses `created_at`.
    pub recorded_at: DateTime<Utc>,
}

/// Raw `orchestration.event_log` row.
#[derive(Debug, Clone, FromRow)]
pub struct EventLogRow {
    pub id: i64,
    pub owner_id: String,
    pub event_type: String,
    pub created_at: i64,
    pub payload: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl TryFrom<EventLogRow> for EventLogEntry {
    type Error = String;

    fn try_from(row: EventLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            event_type: row.event_type.parse()?,
            created_at: row.created_at,
            payload: row.payload,
            recorded_at: row.recorded_at,
        })
    }
}
