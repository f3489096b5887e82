//! NATS JetStream integration.
//!
//! Change events and inbound response events arrive on JetStream streams
//! and are read through durable pull consumers.

pub mod subscriber;

pub use subscriber::JetStreamSubscriber;

use crate::error::{AppError, AppResult};

/// Connect to the NATS server at `url`.
pub async fn connect(url: &str) -> AppResult<async_nats::Client> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| AppError::Nats(format!("connect to {}: {}", url, e)))?;
    tracing::info!(url = %url, "Connected to NATS");
    Ok(client)
}
