//! NATS JetStream pull subscriber.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull::Config as ConsumerConfig, consumer::PullConsumer, Context};
use futures::StreamExt;

use crate::error::{AppError, AppResult};

/// How long one fetch waits for a message before returning empty.
const FETCH_EXPIRY: Duration = Duration::from_secs(5);

fn nats_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Nats(format!("{}: {}", context, e))
}

/// Durable pull consumer bound to one stream and subject filter.
pub struct JetStreamSubscriber {
    consumer: PullConsumer,
    name: String,
}

impl JetStreamSubscriber {
    /// Ensure the stream and durable consumer exist, then bind to them.
    ///
    /// `subjects` are the stream's subjects when it has to be created;
    /// `filter_subject` selects what this consumer receives.
    pub async fn connect(
        client: async_nats::Client,
        stream: &str,
        subjects: Vec<String>,
        consumer: &str,
        filter_subject: &str,
    ) -> AppResult<Self> {
        let js: Context = jetstream::new(client);

        let stream_handle = match js.get_stream(stream).await {
            Ok(handle) => {
                tracing::debug!(stream = %stream, "Using existing NATS stream");
                handle
            }
            Err(_) => {
                let config = jetstream::stream::Config {
                    name: stream.to_string(),
                    subjects,
                    ..Default::default()
                };
                let handle = js
                    .create_stream(config)
                    .await
                    .map_err(|e| nats_error("create stream", e))?;
                tracing::info!(stream = %stream, "Created NATS stream");
                handle
            }
        };

        let pull_consumer = match stream_handle.get_consumer(consumer).await {
            Ok(existing) => existing,
            Err(_) => {
                let config = ConsumerConfig {
                    durable_name: Some(consumer.to_string()),
                    filter_subject: filter_subject.to_string(),
                    ..Default::default()
                };
                let created = stream_handle
                    .create_consumer(config)
                    .await
                    .map_err(|e| nats_error("create consumer", e))?;
                tracing::info!(consumer = %consumer, filter = %filter_subject, "Created NATS consumer");
                created
            }
        };

        Ok(Self {
            consumer: pull_consumer,
            name: consumer.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next message, or `None` if none arrived before the
    /// fetch expired.
    pub async fn receive(&self) -> AppResult<Option<jetstream::Message>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(FETCH_EXPIRY)
            .messages()
            .await
            .map_err(|e| nats_error("fetch", e))?;

        match messages.next().await {
            Some(msg) => Ok(Some(msg.map_err(|e| nats_error("receive", e))?)),
            None => Ok(None),
        }
    }

    pub async fn ack(&self, msg: &jetstream::Message) -> AppResult<()> {
        msg.ack().await.map_err(|e| nats_error("ack", e))
    }

    /// Negatively acknowledge a message so it is redelivered.
    pub async fn nack(&self, msg: &jetstream::Message) -> AppResult<()> {
        msg.ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| nats_error("nack", e))
    }
}
