//! Orchestration event log and change-data-capture dispatch.
//!
//! This crate records orchestration progress and fans captured changes out
//! to entity handlers:
//!
//! - **Event log**: an append-only, per-owner log whose entries carry a
//!   strictly increasing logical timestamp, read by watermark.
//! - **Execution state updates**: response events from running nodes are
//!   folded idempotently into execution records, each update followed by a
//!   log append.
//! - **Change dispatch**: CDC events are classified (snapshot / create /
//!   update / delete) and routed to handlers registered per entity.
//!
//! ## Architecture
//!
//! State lives behind the [`store`] traits, backed by PostgreSQL or process
//! memory. NATS JetStream delivers change events and response events to the
//! [`consumer`] loops; an Axum API exposes the same operations over HTTP.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use orchestration_events::{
//!     services::{EventLogService, ExecutionStateUpdater},
//!     store::{MemoryEventLogStore, MemoryExecutionStore},
//! };
//!
//! let event_log = EventLogService::new(Arc::new(MemoryEventLogStore::new()));
//! let updater = ExecutionStateUpdater::new(Arc::new(MemoryExecutionStore::new()), event_log);
//! updater.apply_response_and_log("plan-1", "node-1", &descriptor).await?;
//! ```

pub mod cdc;
pub mod config;
pub mod consumer;
pub mod db;
pub mod error;
pub mod handlers;
pub mod nats;
pub mod poller;
pub mod result_ext;
pub mod retry;
pub mod services;
pub mod state;
pub mod store;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
