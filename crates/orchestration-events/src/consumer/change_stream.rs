//! Change stream consumer.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};

use super::{consume, Delivery, MessageSource, StreamMessage};
use crate::cdc::{ChangeEvent, ChangeEventDispatcher, ChangeMetadata, DispatchError};
use crate::error::AppResult;
use crate::nats::JetStreamSubscriber;

/// Entity name carried by `subject`, i.e. the part after `<prefix>.`.
pub fn entity_from_subject<'a>(prefix: &str, subject: &'a str) -> Option<&'a str> {
    subject
        .strip_prefix(prefix)?
        .strip_prefix('.')
        .filter(|entity| !entity.is_empty())
}

/// Decode and dispatch one change stream message.
pub async fn process_change(
    dispatcher: &ChangeEventDispatcher,
    subject_prefix: &str,
    subject: &str,
    payload: &[u8],
) -> Delivery {
    let Some(entity) = entity_from_subject(subject_prefix, subject) else {
        warn!(subject = %subject, "Change event on unexpected subject, dropping");
        return Delivery::Ack;
    };

    let event: ChangeEvent = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(subject = %subject, error = %e, "Undecodable change event, dropping");
            return Delivery::Ack;
        }
    };

    let metadata = ChangeMetadata::new(entity).with_source(subject);
    match dispatcher
        .dispatch(&event, &metadata, Utc::now().timestamp_millis())
        .await
    {
        Ok(_) => Delivery::Ack,
        Err(DispatchError::Stopped) => Delivery::Stop,
        Err(e) if e.is_retryable() => {
            warn!(subject = %subject, error = %e, "Change handler failed, redelivering");
            Delivery::Nack
        }
        Err(e) => {
            error!(subject = %subject, error = %e, "Change handler failed permanently");
            Delivery::Ack
        }
    }
}

/// Feeds change events from JetStream into the dispatcher.
pub struct ChangeStreamConsumer<S = JetStreamSubscriber> {
    source: S,
    dispatcher: Arc<ChangeEventDispatcher>,
    subject_prefix: String,
}

impl<S: MessageSource> ChangeStreamConsumer<S> {
    pub fn new(source: S, dispatcher: Arc<ChangeEventDispatcher>, subject_prefix: impl Into<String>) -> Self {
        Self {
            source,
            dispatcher,
            subject_prefix: subject_prefix.into(),
        }
    }

    /// Consume until the dispatcher stops or the stream fails.
    ///
    /// A stream failure stops the dispatcher, so no further events are
    /// dispatched and the other consumers sharing its state shut down too.
    pub async fn run(self) -> AppResult<()> {
        let dispatcher = self.dispatcher.as_ref();
        let prefix = self.subject_prefix.as_str();

        let result = consume(&self.source, dispatcher.subscribe(), move |msg| async move {
            let delivery = process_change(dispatcher, prefix, msg.subject(), msg.payload()).await;
            (msg, delivery)
        })
        .await;

        if let Err(e) = &result {
            error!(consumer = %self.source.name(), error = %e, "Change stream failed, stopping dispatcher");
            self.dispatcher.stop();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::{ChangeHandler, DispatcherState, ExecutionCleanupHandler, EXECUTION_RECORD_ENTITY};
    use crate::error::{AppError, AppResult};
    use crate::db::models::OrchestrationEventType;
    use crate::services::EventLogService;
    use crate::store::MemoryEventLogStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    const PREFIX: &str = "orchestration.cdc";

    struct FailingHandler {
        retryable: bool,
    }

    #[async_trait]
    impl ChangeHandler for FailingHandler {
        fn entity(&self) -> &str {
            "pipeline"
        }

        async fn handle_create_event(&self, _id: &str, _value: Option<&str>) -> AppResult<()> {
            Ok(())
        }

        async fn handle_update_event(&self, _id: &str, _value: Option<&str>) -> AppResult<()> {
            if self.retryable {
                Err(AppError::RetryableStorage("pool timed out".to_string()))
            } else {
                Err(AppError::Validation("bad pipeline".to_string()))
            }
        }

        async fn handle_delete_event(&self, _id: &str) -> AppResult<()> {
            Ok(())
        }
    }

    struct QueuedMessage {
        subject: String,
        payload: Vec<u8>,
    }

    impl StreamMessage for QueuedMessage {
        fn subject(&self) -> &str {
            &self.subject
        }

        fn payload(&self) -> &[u8] {
            &self.payload
        }
    }

    /// Hands out queued messages, then fails like a dropped connection.
    #[derive(Default)]
    struct QueuedSource {
        queue: Mutex<VecDeque<QueuedMessage>>,
        acked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageSource for QueuedSource {
        type Message = QueuedMessage;

        fn name(&self) -> &str {
            "queued"
        }

        async fn receive(&self) -> AppResult<Option<QueuedMessage>> {
            match self.queue.lock().await.pop_front() {
                Some(msg) => Ok(Some(msg)),
                None => Err(AppError::Nats("connection closed".to_string())),
            }
        }

        async fn ack(&self, msg: &QueuedMessage) -> AppResult<()> {
            self.acked.lock().await.push(msg.subject.clone());
            Ok(())
        }

        async fn nack(&self, _msg: &QueuedMessage) -> AppResult<()> {
            Ok(())
        }
    }

    fn update_payload(id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "key": format!(r#"{{"id":"{}"}}"#, id),
            "value": "{}",
            "operationType": "UPDATE",
            "timestamp": 1
        }))
        .unwrap()
    }

    #[test]
    fn test_entity_from_subject() {
        assert_eq!(entity_from_subject(PREFIX, "orchestration.cdc.execution_record"), Some("execution_record"));
        assert_eq!(entity_from_subject(PREFIX, "orchestration.cdc."), None);
        assert_eq!(entity_from_subject(PREFIX, "orchestration.cdcx.pipeline"), None);
        assert_eq!(entity_from_subject(PREFIX, "other.pipeline"), None);
    }

    #[tokio::test]
    async fn test_delete_on_execution_subject_purges_log() {
        let log = EventLogService::new(Arc::new(MemoryEventLogStore::new()));
        log.append("plan-1", OrchestrationEventType::OrchestrationStart, None)
            .await
            .unwrap();
        let mut dispatcher = ChangeEventDispatcher::new();
        dispatcher.register(ExecutionCleanupHandler::new(log.clone()));

        let payload = br#"{"key":"{\"id\":\"plan-1\"}","op":"d"}"#;
        let subject = format!("{}.{}", PREFIX, EXECUTION_RECORD_ENTITY);
        let delivery = process_change(&dispatcher, PREFIX, &subject, payload).await;

        assert_eq!(delivery, Delivery::Ack);
        assert!(log.find_unprocessed("plan-1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_structural_failures_are_acked() {
        let dispatcher = ChangeEventDispatcher::new();
        let subject = format!("{}.pipeline", PREFIX);

        assert_eq!(process_change(&dispatcher, PREFIX, &subject, b"garbage").await, Delivery::Ack);
        assert_eq!(
            process_change(&dispatcher, PREFIX, "elsewhere", &update_payload("a")).await,
            Delivery::Ack
        );
        let malformed_key = br#"{"key":"nope","operationType":"UPDATE"}"#;
        assert_eq!(process_change(&dispatcher, PREFIX, &subject, malformed_key).await, Delivery::Ack);
        assert_eq!(
            process_change(&dispatcher, PREFIX, &subject, &update_payload("a")).await,
            Delivery::Ack
        );
    }

    #[tokio::test]
    async fn test_handler_failures_map_to_delivery() {
        let subject = format!("{}.pipeline", PREFIX);

        let mut retrying = ChangeEventDispatcher::new();
        retrying.register(FailingHandler { retryable: true });
        assert_eq!(
            process_change(&retrying, PREFIX, &subject, &update_payload("a")).await,
            Delivery::Nack
        );

        let mut permanent = ChangeEventDispatcher::new();
        permanent.register(FailingHandler { retryable: false });
        assert_eq!(
            process_change(&permanent, PREFIX, &subject, &update_payload("a")).await,
            Delivery::Ack
        );
    }

    #[tokio::test]
    async fn test_stopped_dispatcher_stops_consumer() {
        let dispatcher = ChangeEventDispatcher::new();
        dispatcher.stop();
        let subject = format!("{}.pipeline", PREFIX);

        assert_eq!(
            process_change(&dispatcher, PREFIX, &subject, &update_payload("a")).await,
            Delivery::Stop
        );
    }

    #[tokio::test]
    async fn test_stream_failure_stops_dispatcher() {
        let log = EventLogService::new(Arc::new(MemoryEventLogStore::new()));
        log.append("plan-1", OrchestrationEventType::OrchestrationStart, None)
            .await
            .unwrap();
        let mut dispatcher = ChangeEventDispatcher::new();
        dispatcher.register(ExecutionCleanupHandler::new(log.clone()));
        let dispatcher = Arc::new(dispatcher);

        let source = QueuedSource::default();
        source.queue.lock().await.push_back(QueuedMessage {
            subject: format!("{}.{}", PREFIX, EXECUTION_RECORD_ENTITY),
            payload: br#"{"key":"{\"id\":\"plan-1\"}","op":"d"}"#.to_vec(),
        });

        let consumer = ChangeStreamConsumer::new(source, dispatcher.clone(), PREFIX);
        let mut state = dispatcher.subscribe();
        let err = consumer.run().await.unwrap_err();

        assert!(matches!(err, AppError::Nats(_)));
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert_eq!(*state.borrow_and_update(), DispatcherState::Stopped);
        assert!(log.find_unprocessed("plan-1", 0).await.unwrap().is_empty());
    }
}
