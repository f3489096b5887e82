//! Stream consumers feeding the dispatcher and the state updater.
//!
//! Message handling is split from the JetStream loop: `process_*`
//! functions decide the [`Delivery`] of one payload, the `run` loops only
//! fetch, acknowledge and watch for shutdown.

pub mod change_stream;
pub mod response;

pub use change_stream::ChangeStreamConsumer;
pub use response::ResponseEventConsumer;

use async_nats::jetstream;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::cdc::DispatcherState;
use crate::error::AppResult;
use crate::nats::JetStreamSubscriber;

/// What to do with a consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Processed or permanently unprocessable.
    Ack,
    /// Redeliver later.
    Nack,
    /// Redeliver later and stop consuming.
    Stop,
}

/// Subject and body of a consumed message.
pub trait StreamMessage {
    fn subject(&self) -> &str;
    fn payload(&self) -> &[u8];
}

impl StreamMessage for jetstream::Message {
    fn subject(&self) -> &str {
        self.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Where a consume loop pulls messages from and settles them.
#[async_trait]
pub trait MessageSource: Send + Sync {
    type Message: StreamMessage + Send + Sync;

    fn name(&self) -> &str;

    /// Next message, or `None` when nothing arrived in time.
    async fn receive(&self) -> AppResult<Option<Self::Message>>;

    async fn ack(&self, msg: &Self::Message) -> AppResult<()>;

    async fn nack(&self, msg: &Self::Message) -> AppResult<()>;
}

#[async_trait]
impl MessageSource for JetStreamSubscriber {
    type Message = jetstream::Message;

    fn name(&self) -> &str {
        JetStreamSubscriber::name(self)
    }

    async fn receive(&self) -> AppResult<Option<jetstream::Message>> {
        JetStreamSubscriber::receive(self).await
    }

    async fn ack(&self, msg: &jetstream::Message) -> AppResult<()> {
        JetStreamSubscriber::ack(self, msg).await
    }

    async fn nack(&self, msg: &jetstream::Message) -> AppResult<()> {
        JetStreamSubscriber::nack(self, msg).await
    }
}

/// Fetch messages until `stop` reports `Stopped`, settling each one with
/// the delivery returned by `process`.
pub(crate) async fn consume<S, F, Fut>(
    source: &S,
    mut stop: watch::Receiver<DispatcherState>,
    process: F,
) -> AppResult<()>
where
    S: MessageSource,
    F: Fn(S::Message) -> Fut,
    Fut: std::future::Future<Output = (S::Message, Delivery)>,
{
    tracing::info!(consumer = %source.name(), "Stream consumer started");

    loop {
        if *stop.borrow_and_update() == DispatcherState::Stopped {
            break;
        }

        let received = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            received = source.receive() => received?,
        };

        let Some(msg) = received else {
            continue;
        };

        let (msg, delivery) = process(msg).await;
        match delivery {
            Delivery::Ack => source.ack(&msg).await?,
            Delivery::Nack => source.nack(&msg).await?,
            Delivery::Stop => {
                source.nack(&msg).await?;
                break;
            }
        }
    }

    tracing::info!(consumer = %source.name(), "Stream consumer stopped");
    Ok(())
}
