//! Per-entity change handlers.

use async_trait::async_trait;

use crate::error::AppResult;

/// Reacts to changes of one entity.
///
/// `value` is the serialized entity after the change. Handlers own its
/// decoding; a value they cannot decode is theirs to log and skip.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// Entity name this handler is registered under.
    fn entity(&self) -> &str;

    /// Called for creates and snapshot reads.
    async fn handle_create_event(&self, id: &str, value: Option<&str>) -> AppResult<()>;

    async fn handle_update_event(&self, id: &str, value: Option<&str>) -> AppResult<()>;

    async fn handle_delete_event(&self, id: &str) -> AppResult<()>;
}
