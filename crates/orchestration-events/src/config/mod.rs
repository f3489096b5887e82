//! Configuration loading from environment variables.
//!
//! Uses `envy` for type-safe parsing of prefixed environment variables.

mod app;
mod database;

pub use app::{AppConfig, StorageBackend};
pub use database::DatabaseConfig;
