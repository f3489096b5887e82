//! Change-data-capture event types.

use serde::{Deserialize, Serialize};

/// Kind of change captured at the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Row read during an initial snapshot.
    #[serde(alias = "r", alias = "READ")]
    Snapshot,
    #[serde(alias = "c")]
    Create,
    #[serde(alias = "u")]
    Update,
    #[serde(alias = "d")]
    Delete,
    /// Anything this build does not recognize.
    #[serde(other)]
    Unknown,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "SNAPSHOT",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single captured change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Serialized JSON key holding at least an `id`.
    pub key: String,

    /// Serialized JSON of the entity after the change, absent on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(alias = "op")]
    pub operation_type: OperationType,

    /// Epoch milliseconds at the source.
    #[serde(default, alias = "ts_ms")]
    pub timestamp: i64,
}

/// Routing information accompanying a change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMetadata {
    /// Entity or collection name; selects the handler.
    pub entity: String,

    /// Stream subject the event arrived on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ChangeMetadata {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}
