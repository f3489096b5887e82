//! Execution record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Field on an execution record accumulating response descriptors as a set.
pub const EXECUTABLE_RESPONSES_FIELD: &str = "executableResponses";

/// Execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Queued,
    Running,
    AsyncWaiting,
    Succeeded,
    Failed,
    Aborted,
    Expired,
}

impl ExecutionStatus {
    /// Whether no further state changes are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Aborted | Self::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::AsyncWaiting => "ASYNC_WAITING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "ASYNC_WAITING" => Ok(Self::AsyncWaiting),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "ABORTED" => Ok(Self::Aborted),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("Unknown execution status: {}", other)),
        }
    }
}

/// One running or completed unit of work (node or plan execution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Runtime id.
    pub id: String,

    pub plan_execution_id: String,

    pub status: ExecutionStatus,

    /// Named mutable fields.
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// A new record in `QUEUED` state.
    pub fn new(id: impl Into<String>, plan_execution_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            plan_execution_id: plan_execution_id.into(),
            status: ExecutionStatus::Queued,
            fields: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Plan-level records own their plan's event log.
    pub fn is_plan(&self) -> bool {
        self.id == self.plan_execution_id
    }

    /// Members of a set-valued field; empty when unset.
    pub fn set_members(&self, field: &str) -> &[serde_json::Value] {
        self.fields
            .get(field)
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[])
    }
}

/// Raw `orchestration.execution_record` row.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: String,
    pub plan_execution_id: String,
    pub status: String,
    pub fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = String;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let fields = match row.fields {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => return Err(format!("fields of {} is not an object: {}", row.id, other)),
        };

        Ok(Self {
            status: row.status.parse()?,
            id: row.id,
            plan_execution_id: row.plan_execution_id,
            fields,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Expired.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::AsyncWaiting.is_terminal());
    }

    #[test]
    fn test_status_from_str_is_case_insensitive() {
        assert_eq!("failed".parse(), Ok(ExecutionStatus::Failed));
        assert_eq!("ASYNC_WAITING".parse(), Ok(ExecutionStatus::AsyncWaiting));
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = ExecutionRecord::new("node-1", "plan-1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["planExecutionId"], "plan-1");
        assert_eq!(json["status"], "QUEUED");
        assert!(!record.is_plan());
        assert!(ExecutionRecord::new("plan-1", "plan-1").is_plan());
    }

    #[test]
    fn test_set_members() {
        let mut record = ExecutionRecord::new("node-1", "plan-1");
        assert!(record.set_members(EXECUTABLE_RESPONSES_FIELD).is_empty());

        record
            .fields
            .insert(EXECUTABLE_RESPONSES_FIELD.to_string(), json!([{"task": "a"}]));
        assert_eq!(record.set_members(EXECUTABLE_RESPONSES_FIELD).len(), 1);
    }

    #[test]
    fn test_row_conversion() {
        let row = ExecutionRow {
            id: "node-1".to_string(),
            plan_execution_id: "plan-1".to_string(),
            status: "RUNNING".to_string(),
            fields: json!({"executableResponses": []}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let record = ExecutionRecord::try_from(row).unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(record.fields.contains_key(EXECUTABLE_RESPONSES_FIELD));
    }
}
