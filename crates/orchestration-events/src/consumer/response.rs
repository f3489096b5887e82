//! Inbound response event consumer.

use tokio::sync::watch;
use tracing::{error, warn};

use super::{consume, Delivery, StreamMessage};
use crate::cdc::DispatcherState;
use crate::error::{AppError, AppResult};
use crate::nats::JetStreamSubscriber;
use crate::retry::{with_backoff, RetryPolicy};
use crate::services::{ExecutionStateUpdater, InboundResponseEvent};

/// Decode one response event and apply it.
///
/// Transient failures are retried in place with `policy`. When only the
/// log append failed, only the append is retried; the response itself is
/// already recorded.
pub async fn process_response(
    updater: &ExecutionStateUpdater,
    policy: &RetryPolicy,
    payload: &[u8],
) -> Delivery {
    let event: InboundResponseEvent = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Undecodable response event, dropping");
            return Delivery::Ack;
        }
    };
    let event = &event;

    let applied = with_backoff(policy, "apply response event", move || async move {
        match updater.apply_response_event(event).await {
            Ok(_) => Ok(None),
            Err(AppError::PartialFailure {
                execution_id,
                runtime_id,
                ..
            }) => Ok(Some((execution_id, runtime_id))),
            Err(e) => Err(e),
        }
    })
    .await;

    let result = match applied {
        Ok(None) => Ok(()),
        Ok(Some((execution_id, runtime_id))) => {
            let (execution_id, runtime_id) = (execution_id.as_str(), runtime_id.as_str());
            with_backoff(policy, "append update event", move || async move {
                updater.append_update_event(execution_id, runtime_id).await
            })
            .await
            .map(|_| ())
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => Delivery::Ack,
        Err(e) if e.is_retryable() => {
            warn!(
                execution_id = %event.ambiance.plan_execution_id,
                error = %e,
                "Retries exhausted, redelivering response event"
            );
            Delivery::Nack
        }
        Err(e) => {
            error!(
                execution_id = %event.ambiance.plan_execution_id,
                error = %e,
                "Response event rejected"
            );
            Delivery::Ack
        }
    }
}

/// Applies response events from JetStream to execution state.
pub struct ResponseEventConsumer {
    subscriber: JetStreamSubscriber,
    updater: ExecutionStateUpdater,
    policy: RetryPolicy,
}

impl ResponseEventConsumer {
    pub fn new(subscriber: JetStreamSubscriber, updater: ExecutionStateUpdater, policy: RetryPolicy) -> Self {
        Self {
            subscriber,
            updater,
            policy,
        }
    }

    /// Consume until `stop` reports `Stopped` or the stream fails.
    pub async fn run(self, stop: watch::Receiver<DispatcherState>) -> AppResult<()> {
        let updater = &self.updater;
        let policy = &self.policy;

        consume(&self.subscriber, stop, move |msg| async move {
            let delivery = process_response(updater, policy, msg.payload()).await;
            (msg, delivery)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{EventLogEntry, ExecutionRecord, OrchestrationEventType, EXECUTABLE_RESPONSES_FIELD};
    use crate::services::EventLogService;
    use crate::store::{EventLogStore, ExecutionStore, MemoryEventLogStore, MemoryExecutionStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Event log whose first `failures` appends fail transiently.
    struct FlakyLog {
        inner: MemoryEventLogStore,
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl EventLogStore for FlakyLog {
        async fn append(
            &self,
            owner_id: &str,
            event_type: OrchestrationEventType,
            payload: Option<serde_json::Value>,
        ) -> AppResult<EventLogEntry> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AppError::RetryableStorage("connection reset".to_string()));
            }
            self.inner.append(owner_id, event_type, payload).await
        }

        async fn find_unprocessed(&self, owner_id: &str, since: i64) -> AppResult<Vec<EventLogEntry>> {
            self.inner.find_unprocessed(owner_id, since).await
        }

        async fn delete_all(&self, owner_id: &str) -> AppResult<u64> {
            self.inner.delete_all(owner_id).await
        }

        fn batch_limit(&self) -> usize {
            self.inner.batch_limit()
        }
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            max_retries,
        }
    }

    fn payload(runtime_id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "ambiance": {"planExecutionId": "plan-1", "levels": [{"runtimeId": runtime_id}]},
            "responseEvent": {"executableResponse": {"async": {"callbackIds": ["cb-1"]}}}
        }))
        .unwrap()
    }

    async fn setup(log: Arc<dyn EventLogStore>) -> (ExecutionStateUpdater, Arc<MemoryExecutionStore>) {
        let executions = Arc::new(MemoryExecutionStore::new());
        executions
            .insert(&ExecutionRecord::new("node-1", "plan-1"))
            .await
            .unwrap();
        let updater = ExecutionStateUpdater::new(executions.clone(), EventLogService::new(log));
        (updater, executions)
    }

    #[tokio::test]
    async fn test_applied_response_is_acked() {
        let (updater, executions) = setup(Arc::new(MemoryEventLogStore::new())).await;

        let delivery = process_response(&updater, &fast_policy(0), &payload("node-1")).await;

        assert_eq!(delivery, Delivery::Ack);
        let record = executions.get("node-1").await.unwrap().unwrap();
        assert_eq!(record.set_members(EXECUTABLE_RESPONSES_FIELD).len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_events_are_acked() {
        let (updater, _) = setup(Arc::new(MemoryEventLogStore::new())).await;
        let policy = fast_policy(3);

        assert_eq!(process_response(&updater, &policy, b"{").await, Delivery::Ack);
        assert_eq!(process_response(&updater, &policy, &payload("node-x")).await, Delivery::Ack);

        let no_levels = br#"{"ambiance":{"planExecutionId":"plan-1","levels":[]},"responseEvent":{"executableResponse":{}}}"#;
        assert_eq!(process_response(&updater, &policy, no_levels).await, Delivery::Ack);
    }

    #[tokio::test]
    async fn test_partial_failure_retries_append_only() {
        let log = Arc::new(FlakyLog {
            inner: MemoryEventLogStore::new(),
            failures: 2,
            attempts: AtomicUsize::new(0),
        });
        let (updater, executions) = setup(log.clone()).await;

        let delivery = process_response(&updater, &fast_policy(3), &payload("node-1")).await;

        assert_eq!(delivery, Delivery::Ack);
        let record = executions.get("node-1").await.unwrap().unwrap();
        assert_eq!(record.set_members(EXECUTABLE_RESPONSES_FIELD).len(), 1);
        assert_eq!(log.find_unprocessed("plan-1", 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_nacked() {
        let log = Arc::new(FlakyLog {
            inner: MemoryEventLogStore::new(),
            failures: usize::MAX,
            attempts: AtomicUsize::new(0),
        });
        let (updater, _) = setup(log).await;

        let delivery = process_response(&updater, &fast_policy(2), &payload("node-1")).await;
        assert_eq!(delivery, Delivery::Nack);
    }
}
